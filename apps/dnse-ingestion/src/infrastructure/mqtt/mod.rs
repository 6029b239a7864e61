//! Upstream MQTT Adapter
//!
//! MQTT v5 over secure WebSocket to the DNSE KRX market data broker.
//!
//! - `driver`: Event loop owner; reports session transitions
//! - `upstream`: `UpstreamPort` handle used by the subscription registry
//! - `reconnect`: Backoff between reconnect attempts

pub mod driver;
pub mod reconnect;
pub mod upstream;

pub use driver::{ConnectError, MqttDriver, MqttSettings, client_id, request_capacity};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use upstream::MqttUpstream;
