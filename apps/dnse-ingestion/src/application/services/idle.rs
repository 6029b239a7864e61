//! Idle Monitor
//!
//! Shuts the process down after downstream listeners have been absent for
//! a sustained period, so the upstream session is not held open for nobody.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::BusPort;
use crate::application::services::registry::SubscriptionRegistry;
use crate::domain::streaming::ChannelNamespace;
use crate::infrastructure::metrics;

// =============================================================================
// Idle Tracker
// =============================================================================

/// Verdict for one listener-count sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    /// At least one listener.
    Active,
    /// No listeners, threshold not yet reached.
    Idle {
        /// Time since the zero run started.
        idle_for: Duration,
    },
    /// No listeners for at least the threshold.
    Expired,
}

/// Tracks the start of the current zero-listener run.
#[derive(Debug, Clone)]
pub struct IdleTracker {
    threshold: Duration,
    idle_since: Option<Instant>,
}

impl IdleTracker {
    /// Create a tracker with the given threshold.
    #[must_use]
    pub const fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            idle_since: None,
        }
    }

    /// Record a total listener count observed at `now`.
    pub fn observe(&mut self, listeners: u64, now: Instant) -> IdleVerdict {
        if listeners > 0 {
            self.idle_since = None;
            return IdleVerdict::Active;
        }

        let since = *self.idle_since.get_or_insert(now);
        let idle_for = now.saturating_duration_since(since);
        if idle_for >= self.threshold {
            IdleVerdict::Expired
        } else {
            IdleVerdict::Idle { idle_for }
        }
    }

    /// Start of the current zero run, if any.
    #[must_use]
    pub const fn idle_since(&self) -> Option<Instant> {
        self.idle_since
    }
}

// =============================================================================
// Idle Monitor
// =============================================================================

/// Idle monitor settings.
#[derive(Debug, Clone, Copy)]
pub struct IdleConfig {
    /// Sampling interval.
    pub interval: Duration,
    /// Zero-listener duration that triggers shutdown.
    pub threshold: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            threshold: Duration::from_secs(300),
        }
    }
}

/// Periodic listener-count sampler.
pub struct IdleMonitor {
    bus: Arc<dyn BusPort>,
    registry: Arc<SubscriptionRegistry>,
    namespace: ChannelNamespace,
    config: IdleConfig,
}

impl IdleMonitor {
    /// Create a monitor over the registry's channels.
    #[must_use]
    pub fn new(
        bus: Arc<dyn BusPort>,
        registry: Arc<SubscriptionRegistry>,
        namespace: ChannelNamespace,
        config: IdleConfig,
    ) -> Self {
        Self {
            bus,
            registry,
            namespace,
            config,
        }
    }

    /// Sample until the idle threshold is reached or `stop` fires.
    ///
    /// Cancels `shutdown` once on expiry. Returns whether it did.
    pub async fn run(self, shutdown: CancellationToken, stop: CancellationToken) -> bool {
        let mut tracker = IdleTracker::new(self.config.threshold);
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.config.interval,
            self.config.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            threshold_secs = self.config.threshold.as_secs(),
            "Idle monitor started"
        );

        loop {
            tokio::select! {
                () = stop.cancelled() => {
                    tracing::debug!("Idle monitor stopped");
                    return false;
                }
                _ = ticker.tick() => {}
            }

            let Some(listeners) = self.sample().await else {
                continue;
            };

            match tracker.observe(listeners, Instant::now()) {
                IdleVerdict::Active => {
                    tracing::debug!(listeners, "Downstream listeners present");
                }
                IdleVerdict::Idle { idle_for } => {
                    tracing::info!(idle_secs = idle_for.as_secs(), "No downstream listeners");
                }
                IdleVerdict::Expired => {
                    tracing::info!(
                        threshold_secs = self.config.threshold.as_secs(),
                        "No downstream listeners for threshold, shutting down"
                    );
                    shutdown.cancel();
                    return true;
                }
            }
        }
    }

    /// Total listeners across the registry's channels.
    ///
    /// `None` on a query error; an empty registry counts as zero.
    async fn sample(&self) -> Option<u64> {
        let channels = self.registry.channels(&self.namespace);
        if channels.is_empty() {
            metrics::set_downstream_listeners(0);
            return Some(0);
        }

        match self.bus.count_subscribers(&channels).await {
            Ok(counts) => {
                let total = counts.values().sum();
                metrics::set_downstream_listeners(total);
                Some(total)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Listener count query failed");
                None
            }
        }
    }
}
