//! Control Event Listener
//!
//! Applies symbol activation events from the downstream control channel to
//! the subscription registry.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BusError, BusPort};
use crate::application::services::registry::{RegistryChange, SubscriptionRegistry};
use crate::application::services::session::SessionManager;
use crate::domain::streaming::{ChannelNamespace, ControlEvent};
use crate::infrastructure::metrics::{self, ControlOutcome};

/// Listens on `<env>.dnse.krx.tickers.events`.
pub struct ControlEventListener {
    bus: Arc<dyn BusPort>,
    registry: Arc<SubscriptionRegistry>,
    session: Arc<SessionManager>,
    channel: String,
}

impl ControlEventListener {
    /// Create a listener for the namespace's control channel.
    #[must_use]
    pub fn new(
        bus: Arc<dyn BusPort>,
        registry: Arc<SubscriptionRegistry>,
        session: Arc<SessionManager>,
        namespace: &ChannelNamespace,
    ) -> Self {
        Self {
            bus,
            registry,
            session,
            channel: namespace.control_channel(),
        }
    }

    /// Control channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Consume events until the subscription ends or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `BusError` if the control channel cannot be subscribed.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), BusError> {
        let mut events = self.bus.subscribe(&self.channel).await?;
        tracing::info!(channel = %self.channel, "Listening for ticker events");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = events.next() => {
                    let Some(message) = next else {
                        tracing::warn!(channel = %self.channel, "Control subscription ended");
                        break;
                    };
                    self.handle(&message.payload);
                }
            }
        }
        Ok(())
    }

    /// Apply one control payload to the registry.
    pub fn handle(&self, payload: &[u8]) -> Option<RegistryChange> {
        let (symbol, active) = match ControlEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                metrics::record_control_event(ControlOutcome::Invalid);
                tracing::warn!(error = %e, "Ignoring ticker event");
                return None;
            }
        };

        let live = || self.session.live_upstream();
        let change = if active {
            self.registry.activate(symbol.as_str(), live)
        } else {
            self.registry.deactivate(symbol.as_str(), live)
        };

        let outcome = if change.is_change() {
            ControlOutcome::Applied
        } else {
            ControlOutcome::Noop
        };
        metrics::record_control_event(outcome);
        tracing::debug!(symbol = %symbol, active, ?change, "Ticker event handled");
        Some(change)
    }
}
