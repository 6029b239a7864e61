//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `AuthPort`: Token issuance and identity lookup over HTTP
//! - `BusPort`: Downstream pub/sub bus (publish, subscribe, listener counts)
//! - `UpstreamPort`: Live handle on the upstream broker session

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

// =============================================================================
// Auth Port
// =============================================================================

/// Auth collaborator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Request could not be sent or timed out.
    #[error("auth request to {endpoint} failed: {message}")]
    Transport {
        /// Endpoint path.
        endpoint: &'static str,
        /// Underlying error.
        message: String,
    },
    /// Server answered with a non-2xx status.
    #[error("auth endpoint {endpoint} returned status {status}")]
    Status {
        /// Endpoint path.
        endpoint: &'static str,
        /// HTTP status code.
        status: u16,
    },
    /// Response body could not be decoded.
    #[error("malformed response from {endpoint}: {message}")]
    Decode {
        /// Endpoint path.
        endpoint: &'static str,
        /// Decoder error.
        message: String,
    },
    /// Response decoded but the required field was empty.
    #[error("empty {0} in auth response")]
    EmptyField(&'static str),
}

/// Exchanges account credentials for a bearer token and resolves identity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthPort: Send + Sync {
    /// Exchange username and password for a bearer token.
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, AuthError>;

    /// Resolve the investor identifier a token belongs to.
    async fn resolve_identity(&self, token: &str) -> Result<String, AuthError>;
}

// =============================================================================
// Bus Port
// =============================================================================

/// Downstream bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Connection could not be established or was lost.
    #[error("bus connection error: {0}")]
    Connection(String),
    /// Publish command failed.
    #[error("publish to {channel} failed: {message}")]
    Publish {
        /// Target channel.
        channel: String,
        /// Underlying error.
        message: String,
    },
    /// Subscribe command failed.
    #[error("subscribe to {channel} failed: {message}")]
    Subscribe {
        /// Target channel.
        channel: String,
        /// Underlying error.
        message: String,
    },
    /// Query (listener count, health check) failed.
    #[error("bus query failed: {0}")]
    Query(String),
}

/// A message received from a bus subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Channel the message arrived on.
    pub channel: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// Downstream pub/sub bus.
#[async_trait]
pub trait BusPort: Send + Sync {
    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribe to a channel. The stream ends when the subscription drops.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, BusMessage>, BusError>;

    /// Listener count per channel.
    async fn count_subscribers(&self, channels: &[String]) -> Result<HashMap<String, u64>, BusError>;

    /// Round-trip health check.
    async fn health_check(&self) -> Result<(), BusError>;
}

// =============================================================================
// Upstream Port
// =============================================================================

/// Upstream subscribe/unsubscribe errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// No session handle is installed.
    #[error("upstream session not connected")]
    NotConnected,
    /// Subscribe request was rejected.
    #[error("subscribe to {topic} failed: {message}")]
    Subscribe {
        /// Topic.
        topic: String,
        /// Underlying error.
        message: String,
    },
    /// Unsubscribe request was rejected.
    #[error("unsubscribe failed: {0}")]
    Unsubscribe(String),
}

/// Handle on the live upstream session.
///
/// Calls must not block: they are issued while the subscription registry
/// lock is held.
pub trait UpstreamPort: Send + Sync {
    /// Whether the session currently reports itself connected.
    fn is_connected(&self) -> bool;

    /// Request a subscription to one topic.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError` if the request cannot be queued.
    fn subscribe(&self, topic: &str) -> Result<(), UpstreamError>;

    /// Request removal of a batch of topics.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError` if the request cannot be queued.
    fn unsubscribe(&self, topics: &[String]) -> Result<(), UpstreamError>;
}
