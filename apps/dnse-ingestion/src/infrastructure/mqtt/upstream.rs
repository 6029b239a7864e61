//! MQTT Upstream Handle
//!
//! `UpstreamPort` over a `rumqttc` v5 client. Requests are queued with the
//! non-blocking `try_*` calls and flushed by the driver's event loop.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rumqttc::v5::AsyncClient;
use rumqttc::v5::mqttbytes::QoS;

use crate::application::ports::{UpstreamError, UpstreamPort};

/// Delivery guarantee requested for every topic.
pub const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;

/// Current client handle plus the connection flag the driver maintains.
#[derive(Default)]
pub struct MqttUpstream {
    client: RwLock<Option<AsyncClient>>,
    connected: AtomicBool,
}

impl MqttUpstream {
    /// Create a handle with no client installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the client of a freshly built connection.
    pub fn install(&self, client: AsyncClient) {
        self.connected.store(false, Ordering::Release);
        *self.client.write() = Some(client);
    }

    /// Update the connection flag. Returns the previous value.
    pub fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::AcqRel)
    }

    /// Queue a DISCONNECT on the current client.
    pub fn request_disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        if let Some(client) = self.client.read().as_ref()
            && let Err(e) = client.try_disconnect()
        {
            tracing::debug!(error = %e, "Disconnect request not queued");
        }
    }
}

impl std::fmt::Debug for MqttUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttUpstream")
            .field("installed", &self.client.read().is_some())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl UpstreamPort for MqttUpstream {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn subscribe(&self, topic: &str) -> Result<(), UpstreamError> {
        let guard = self.client.read();
        let client = guard.as_ref().ok_or(UpstreamError::NotConnected)?;
        client
            .try_subscribe(topic, SUBSCRIBE_QOS)
            .map_err(|e| UpstreamError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    fn unsubscribe(&self, topics: &[String]) -> Result<(), UpstreamError> {
        let guard = self.client.read();
        let client = guard.as_ref().ok_or(UpstreamError::NotConnected)?;

        let failed: Vec<String> = topics
            .iter()
            .filter_map(|topic| {
                client
                    .try_unsubscribe(topic.as_str())
                    .err()
                    .map(|e| format!("{topic}: {e}"))
            })
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(UpstreamError::Unsubscribe(failed.join("; ")))
        }
    }
}
