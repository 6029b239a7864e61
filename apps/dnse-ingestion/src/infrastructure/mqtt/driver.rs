//! MQTT Session Driver
//!
//! Owns the `rumqttc` event loop and translates its events into session
//! transitions and pipeline offers:
//!
//! - `ConnAck` -> `SessionManager::on_connected` (reconcile subscriptions)
//! - `Publish` -> `MessagePipeline::offer` (payload copied out)
//! - poll error -> `on_connection_lost` / `on_reconnecting`, then backoff
//!
//! When a credential refresh lands between attempts the client is rebuilt
//! with the new token before the next poll.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rumqttc::Transport;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::UpstreamPort;
use crate::application::services::pipeline::MessagePipeline;
use crate::application::services::session::SessionManager;
use crate::domain::credential::Credential;
use crate::domain::streaming::UpstreamMessage;
use crate::domain::subscription::FeedKind;
use crate::infrastructure::config::BrokerSettings;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::upstream::MqttUpstream;

/// Floor for the client request queue.
const MIN_REQUEST_CAPACITY: usize = 8_192;

/// Time allowed to flush a DISCONNECT on shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

// =============================================================================
// Settings
// =============================================================================

/// Connection settings for the driver.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Broker URL (`wss://host:port/path`).
    pub url: String,
    /// Broker port.
    pub port: u16,
    /// Client identifier prefix.
    pub client_id_prefix: String,
    /// Protocol keep-alive.
    pub keep_alive: Duration,
    /// Time allowed for the initial handshake.
    pub connect_timeout: Duration,
    /// Backoff between reconnect attempts.
    pub reconnect: ReconnectConfig,
}

impl From<&BrokerSettings> for MqttSettings {
    fn from(broker: &BrokerSettings) -> Self {
        Self {
            url: broker.url(),
            port: broker.port,
            client_id_prefix: broker.client_id_prefix.clone(),
            keep_alive: broker.keep_alive,
            connect_timeout: broker.connect_timeout,
            reconnect: broker.reconnect_config(),
        }
    }
}

/// Request queue capacity for a registry of `symbols` active symbols.
///
/// Reconciliation runs on the driver task and queues one subscribe per
/// topic before the loop polls again, so the queue must hold the whole
/// registry. Doubled for symbols activated between builds; the driver
/// rebuilds the client before a retry once the registry outgrows it.
#[must_use]
pub fn request_capacity(symbols: usize) -> usize {
    symbols
        .saturating_mul(FeedKind::all().len() * 2)
        .max(MIN_REQUEST_CAPACITY)
}

/// Client identifier: prefix plus a random suffix in `1000..2000`.
#[must_use]
pub fn client_id(prefix: &str) -> String {
    let suffix: u16 = rand::rng().random_range(1000..2000);
    format!("{prefix}{suffix}")
}

// =============================================================================
// Errors
// =============================================================================

/// Initial connection failures. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No `ConnAck` within the connect timeout.
    #[error("upstream handshake timed out after {0:?}")]
    Timeout(Duration),
    /// Broker refused or the transport failed.
    #[error("upstream connect failed: {0}")]
    Failed(String),
}

// =============================================================================
// Driver
// =============================================================================

/// Credential generation and request capacity a client was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClientEpoch {
    generation: u64,
    capacity: usize,
}

/// What the event loop does after handling one poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Poll again.
    Continue,
    /// Poll failed: wait, then retry.
    Backoff(Duration),
}

/// Drives the single upstream MQTT session.
pub struct MqttDriver {
    settings: MqttSettings,
    client_id: String,
    session: Arc<SessionManager>,
    upstream: Arc<MqttUpstream>,
    pipeline: MessagePipeline,
}

impl MqttDriver {
    /// Create a driver feeding `pipeline` and reporting to `session`.
    #[must_use]
    pub fn new(settings: MqttSettings, session: Arc<SessionManager>, pipeline: MessagePipeline) -> Self {
        let client_id = client_id(&settings.client_id_prefix);
        Self {
            settings,
            client_id,
            session,
            upstream: Arc::new(MqttUpstream::new()),
            pipeline,
        }
    }

    /// Client identifier presented to the broker.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn options(&self, credential: &Credential) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.settings.url, self.settings.port);
        options
            .set_transport(Transport::wss_with_default_config())
            .set_credentials(credential.investor_id.clone(), credential.token.clone())
            .set_keep_alive(self.settings.keep_alive)
            .set_clean_start(true);
        options
    }

    /// Build a client from the current credential and install it.
    fn build(&self) -> (ClientEpoch, EventLoop) {
        let credentials = self.session.credentials();
        let epoch = ClientEpoch {
            generation: credentials.generation(),
            capacity: request_capacity(self.session.registry().len()),
        };
        let (client, eventloop) =
            AsyncClient::new(self.options(&credentials.snapshot()), epoch.capacity);
        self.upstream.install(client);
        (epoch, eventloop)
    }

    /// Rebuild the client if a refresh rotated the credential or the
    /// registry outgrew the request queue since `epoch`.
    fn rebuild_if_stale(&self, epoch: &mut ClientEpoch) -> Option<EventLoop> {
        let generation = self.session.credentials().generation();
        let needed = request_capacity(self.session.registry().len());
        if generation == epoch.generation && needed <= epoch.capacity {
            return None;
        }

        let (built, eventloop) = self.build();
        *epoch = built;
        tracing::info!(
            generation = built.generation,
            capacity = built.capacity,
            "Rebuilt upstream client"
        );
        Some(eventloop)
    }

    /// Apply one poll result to the session and pipeline.
    fn handle_event(
        &self,
        event: Result<Event, ConnectionError>,
        policy: &mut ReconnectPolicy,
    ) -> Step {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                policy.reset();
                self.upstream.set_connected(true);
                self.session.on_connected();
                Step::Continue
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                self.pipeline
                    .offer(UpstreamMessage::copy_from(&publish.topic, &publish.payload));
                Step::Continue
            }
            Ok(Event::Incoming(Packet::Disconnect(_))) => {
                tracing::warn!("Broker sent DISCONNECT");
                Step::Continue
            }
            Ok(_) => Step::Continue,
            Err(e) => {
                if self.upstream.set_connected(false) {
                    self.session.on_connection_lost(&e.to_string());
                }

                let delay = policy.next_delay();
                self.session.on_reconnecting(policy.attempt());
                tracing::debug!(
                    error = %e,
                    attempt = policy.attempt(),
                    delay_ms = delay.as_millis(),
                    "Upstream poll failed, backing off"
                );
                Step::Backoff(delay)
            }
        }
    }

    /// Perform the initial handshake, then spawn the event loop.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if no `ConnAck` arrives within the connect
    /// timeout. There is no retry around the first connect.
    pub async fn connect(self, cancel: CancellationToken) -> Result<JoinHandle<()>, ConnectError> {
        self.session
            .attach(Arc::clone(&self.upstream) as Arc<dyn UpstreamPort>);
        self.session.on_connecting();
        tracing::info!(
            client_id = %self.client_id,
            url = %self.settings.url,
            "Connecting to market data broker"
        );

        let (epoch, mut eventloop) = self.build();
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(ConnectError::Failed(e.to_string())),
                }
            }
        };

        let result = tokio::time::timeout(self.settings.connect_timeout, handshake)
            .await
            .unwrap_or(Err(ConnectError::Timeout(self.settings.connect_timeout)));
        if let Err(e) = result {
            self.session.on_disconnected();
            return Err(e);
        }

        self.upstream.set_connected(true);
        self.session.on_connected();

        Ok(tokio::spawn(self.run(eventloop, epoch, cancel)))
    }

    async fn run(self, mut eventloop: EventLoop, mut epoch: ClientEpoch, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.settings.reconnect);

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            if let Step::Backoff(delay) = self.handle_event(event, &mut policy) {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                if let Some(rebuilt) = self.rebuild_if_stale(&mut epoch) {
                    eventloop = rebuilt;
                }
            }
        }

        self.upstream.request_disconnect();
        let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
            while eventloop.poll().await.is_ok() {}
        })
        .await;
        self.session.on_disconnected();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;

    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use parking_lot::Mutex;
    use rumqttc::v5::Request;
    use rumqttc::v5::mqttbytes::QoS;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Publish};

    use crate::application::ports::{BusError, BusMessage, BusPort, MockAuthPort};
    use crate::application::services::pipeline::PipelineQueue;
    use crate::application::services::registry::SubscriptionRegistry;
    use crate::application::services::session::{RefreshConfig, SessionState};
    use crate::domain::credential::CredentialStore;
    use crate::domain::streaming::ChannelNamespace;

    const TICK_TOPIC: &str = "plaintext/quotes/krx/mdds/tick/v1/roundlot/symbol/FPT";

    #[derive(Default)]
    struct CaptureBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl BusPort for CaptureBus {
        async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
            self.published.lock().push((channel.to_string(), payload));
            Ok(())
        }

        async fn subscribe(&self, _: &str) -> Result<BoxStream<'static, BusMessage>, BusError> {
            Ok(Box::pin(futures::stream::pending::<BusMessage>()))
        }

        async fn count_subscribers(&self, _: &[String]) -> Result<HashMap<String, u64>, BusError> {
            Ok(HashMap::new())
        }

        async fn health_check(&self) -> Result<(), BusError> {
            Ok(())
        }
    }

    struct Harness {
        driver: MqttDriver,
        session: Arc<SessionManager>,
        pipeline: MessagePipeline,
        queue: PipelineQueue,
        requests: flume::Receiver<Request>,
    }

    /// Driver wired to a session whose client requests land in `requests`.
    fn harness(symbols: &[&str]) -> Harness {
        let session = Arc::new(SessionManager::new(
            Arc::new(SubscriptionRegistry::seeded(symbols.iter().copied())),
            Arc::new(CredentialStore::new(Credential {
                username: "user".to_string(),
                password: "pass".to_string(),
                investor_id: "inv-1".to_string(),
                token: "first".to_string(),
            })),
            Arc::new(MockAuthPort::new()),
            RefreshConfig {
                timeout: Duration::from_secs(3600),
                poll_interval: Duration::from_secs(60),
            },
            CancellationToken::new(),
        ));
        let (pipeline, queue) = MessagePipeline::new(8);
        let driver = MqttDriver::new(
            MqttSettings::from(&BrokerSettings::default()),
            Arc::clone(&session),
            pipeline.clone(),
        );

        let (tx, requests) = flume::bounded(64);
        driver.upstream.install(AsyncClient::from_senders(tx));
        session.attach(Arc::clone(&driver.upstream) as Arc<dyn UpstreamPort>);

        Harness {
            driver,
            session,
            pipeline,
            queue,
            requests,
        }
    }

    fn steady_policy() -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            jitter_factor: 0.0,
            ..ReconnectConfig::default()
        })
    }

    fn connack() -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        })))
    }

    fn reset() -> Result<Event, ConnectionError> {
        Err(ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }

    fn subscribed_topics(requests: &flume::Receiver<Request>) -> Vec<String> {
        let mut topics: Vec<String> = requests
            .try_iter()
            .filter_map(|request| match request {
                Request::Subscribe(subscribe) => Some(subscribe.filters),
                _ => None,
            })
            .flatten()
            .map(|filter| filter.path)
            .collect();
        topics.sort();
        topics
    }

    #[test]
    fn client_id_has_numeric_suffix() {
        for _ in 0..50 {
            let id = client_id("dnse-user-client-mkv-");
            let suffix: u16 = id
                .strip_prefix("dnse-user-client-mkv-")
                .unwrap()
                .parse()
                .unwrap();
            assert!((1000..2000).contains(&suffix));
        }
    }

    #[test]
    fn settings_from_broker() {
        let settings = MqttSettings::from(&BrokerSettings::default());
        assert_eq!(settings.url, "wss://datafeed-lts-krx.dnse.com.vn:443/wss");
        assert_eq!(settings.port, 443);
        assert_eq!(settings.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn request_capacity_holds_the_registry() {
        assert_eq!(request_capacity(0), MIN_REQUEST_CAPACITY);
        assert_eq!(request_capacity(1_000), MIN_REQUEST_CAPACITY);
        assert_eq!(request_capacity(5_000), 40_000);
        assert_eq!(request_capacity(usize::MAX), usize::MAX);
    }

    #[tokio::test]
    async fn connack_goes_live_and_reasserts_registry() {
        let h = harness(&["fpt", "vnm"]);
        let mut policy = steady_policy();
        policy.next_delay();
        policy.next_delay();

        assert_eq!(h.driver.handle_event(connack(), &mut policy), Step::Continue);

        assert_eq!(h.session.state(), SessionState::Connected);
        assert!(h.session.is_live());
        assert_eq!(policy.attempt(), 0);

        let mut expected: Vec<String> = ["FPT", "VNM"]
            .iter()
            .flat_map(|s| crate::domain::subscription::Symbol::normalize(s).unwrap().topics())
            .collect();
        expected.sort();
        assert_eq!(subscribed_topics(&h.requests), expected);
    }

    #[tokio::test]
    async fn publish_is_copied_into_the_pipeline() {
        let h = harness(&["fpt"]);
        let payload = br#"{"symbol":"FPT","matchPrice":97.5}"#;
        let publish = Publish::new(TICK_TOPIC, QoS::AtLeastOnce, payload.to_vec(), None);

        let step = h.driver.handle_event(
            Ok(Event::Incoming(Packet::Publish(publish))),
            &mut steady_policy(),
        );

        assert_eq!(step, Step::Continue);
        assert_eq!(h.pipeline.stats().enqueued(), 1);

        let bus = Arc::new(CaptureBus::default());
        let cancel = CancellationToken::new();
        let workers = h.queue.spawn_workers(
            1,
            Arc::clone(&bus) as Arc<dyn BusPort>,
            ChannelNamespace::dnse_krx("dev"),
            cancel.clone(),
        );
        tokio::time::timeout(Duration::from_secs(2), async {
            while bus.published.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            *bus.published.lock(),
            vec![("dev.dnse.krx.tick.FPT".to_string(), payload.to_vec())]
        );
        cancel.cancel();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test]
    async fn poll_errors_mark_loss_then_back_off() {
        let h = harness(&["fpt"]);
        let mut policy = steady_policy();
        h.driver.handle_event(connack(), &mut policy);
        assert!(h.driver.upstream.is_connected());

        let first = h.driver.handle_event(reset(), &mut policy);

        assert_eq!(first, Step::Backoff(Duration::from_millis(500)));
        assert!(!h.driver.upstream.is_connected());
        assert!(!h.session.is_live());
        assert_eq!(h.session.state(), SessionState::Reconnecting);
        assert_eq!(h.session.reconnect_attempts(), 1);

        // Already down: no second loss, only another retry.
        let second = h.driver.handle_event(reset(), &mut policy);

        assert_eq!(second, Step::Backoff(Duration::from_secs(1)));
        assert_eq!(h.session.state(), SessionState::Reconnecting);
        assert_eq!(h.session.reconnect_attempts(), 2);
    }

    #[tokio::test]
    async fn reconnect_after_loss_reasserts_with_a_reset_backoff() {
        let h = harness(&["hpg"]);
        let mut policy = steady_policy();
        h.driver.handle_event(connack(), &mut policy);
        h.driver.handle_event(reset(), &mut policy);
        let _ = subscribed_topics(&h.requests);

        h.driver.handle_event(connack(), &mut policy);

        assert!(h.session.is_live());
        assert_eq!(subscribed_topics(&h.requests).len(), 4);
        assert_eq!(policy.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn client_is_kept_while_credential_is_unchanged() {
        let h = harness(&["fpt"]);
        let (mut epoch, _eventloop) = h.driver.build();

        assert!(h.driver.rebuild_if_stale(&mut epoch).is_none());
        assert_eq!(epoch.generation, 0);
    }

    #[test]
    fn refreshed_credential_rebuilds_client_with_new_token() {
        let h = harness(&["fpt"]);
        let (mut epoch, eventloop) = h.driver.build();
        assert_eq!(
            eventloop.options.credentials(),
            Some(("inv-1".to_string(), "first".to_string()))
        );

        h.session
            .credentials()
            .rotate("inv-1", "second".to_string())
            .unwrap();
        let rebuilt = h.driver.rebuild_if_stale(&mut epoch).unwrap();

        assert_eq!(epoch.generation, 1);
        assert_eq!(
            rebuilt.options.credentials(),
            Some(("inv-1".to_string(), "second".to_string()))
        );
        assert!(h.driver.rebuild_if_stale(&mut epoch).is_none());
    }

    #[test]
    fn outgrown_request_queue_rebuilds_client() {
        let h = harness(&["fpt"]);
        let mut epoch = ClientEpoch {
            generation: 0,
            capacity: 1,
        };

        assert!(h.driver.rebuild_if_stale(&mut epoch).is_some());
        assert_eq!(epoch.capacity, MIN_REQUEST_CAPACITY);
    }
}
