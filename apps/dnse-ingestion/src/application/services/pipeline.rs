//! Message Pipeline
//!
//! Bounded FIFO between the upstream wire and a fixed pool of publishing
//! workers. The producer side never blocks: when the queue is full the
//! offered message is dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::BusPort;
use crate::domain::streaming::{ChannelNamespace, UpstreamMessage};
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Stats
// =============================================================================

/// Pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    publish_errors: AtomicU64,
    unroutable: AtomicU64,
}

impl PipelineStats {
    /// Messages accepted into the queue.
    #[must_use]
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Messages dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages published downstream.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Failed publishes.
    #[must_use]
    pub fn publish_errors(&self) -> u64 {
        self.publish_errors.load(Ordering::Relaxed)
    }

    /// Messages discarded because their topic could not be routed.
    #[must_use]
    pub fn unroutable(&self) -> u64 {
        self.unroutable.load(Ordering::Relaxed)
    }
}

/// Result of offering a message to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Message queued.
    Enqueued,
    /// Queue full; message dropped.
    Dropped,
    /// Workers gone; message dropped.
    Closed,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Producer handle on the message queue.
#[derive(Debug, Clone)]
pub struct MessagePipeline {
    tx: mpsc::Sender<UpstreamMessage>,
    capacity: usize,
    stats: Arc<PipelineStats>,
}

/// Consumer side of the queue, shared by the worker pool.
#[derive(Debug)]
pub struct PipelineQueue {
    rx: Arc<Mutex<mpsc::Receiver<UpstreamMessage>>>,
    stats: Arc<PipelineStats>,
}

impl MessagePipeline {
    /// Create a queue holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, PipelineQueue) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(PipelineStats::default());
        (
            Self {
                tx,
                capacity,
                stats: Arc::clone(&stats),
            },
            PipelineQueue {
                rx: Arc::new(Mutex::new(rx)),
                stats,
            },
        )
    }

    /// Offer a message without waiting.
    pub fn offer(&self, message: UpstreamMessage) -> Offer {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::record_message_received();
                Offer::Enqueued
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_message_dropped(DropReason::QueueFull);
                tracing::warn!(topic = %message.topic, dropped, "Queue full, dropping message");
                Offer::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                tracing::debug!(topic = %message.topic, "Queue closed, dropping message");
                Offer::Closed
            }
        }
    }

    /// Messages currently queued.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Configured queue capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shared counters.
    #[must_use]
    pub const fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }
}

impl PipelineQueue {
    /// Spawn `workers` tasks draining the queue into `bus`.
    ///
    /// Workers exit when the queue closes or `cancel` fires.
    #[must_use]
    pub fn spawn_workers(
        self,
        workers: usize,
        bus: Arc<dyn BusPort>,
        namespace: ChannelNamespace,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let namespace = Arc::new(namespace);
        (0..workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    rx: Arc::clone(&self.rx),
                    bus: Arc::clone(&bus),
                    namespace: Arc::clone(&namespace),
                    stats: Arc::clone(&self.stats),
                };
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect()
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<UpstreamMessage>>>,
    bus: Arc<dyn BusPort>,
    namespace: Arc<ChannelNamespace>,
    stats: Arc<PipelineStats>,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) {
        tracing::debug!(worker = self.id, "Publish worker started");
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => None,
                message = async { self.rx.lock().await.recv().await } => message,
            };
            let Some(message) = next else {
                break;
            };
            self.publish(message).await;
        }
        tracing::debug!(worker = self.id, "Publish worker stopped");
    }

    async fn publish(&self, message: UpstreamMessage) {
        let Some((datatype, channel)) = self.namespace.route(&message.topic) else {
            self.stats.unroutable.fetch_add(1, Ordering::Relaxed);
            metrics::record_message_dropped(DropReason::Unroutable);
            tracing::debug!(
                topic = %message.topic,
                payload = %String::from_utf8_lossy(&message.payload),
                "Unroutable message"
            );
            return;
        };

        match self.bus.publish(&channel, message.payload).await {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                metrics::record_message_published(datatype);
            }
            Err(e) => {
                self.stats.publish_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_publish_error();
                tracing::error!(worker = self.id, channel = %channel, error = %e, "Publish failed");
            }
        }
    }
}
