#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! DNSE Ingestion - KRX Market Data Ingester
//!
//! Holds one MQTT v5 session (over secure WebSocket) to the DNSE market data
//! broker, subscribes to the feeds of every active symbol, and republishes each
//! upstream message verbatim onto a Redis pub/sub channel derived from its topic.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `subscription`: Symbols and upstream feed topics
//!   - `streaming`: Topic classification and channel naming
//!   - `credential`: Shared credential with generation tracking
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Auth, bus and upstream interfaces
//!   - `services`: Registry, session, pipeline, control events, idle shutdown
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `mqtt`: Session driver, reconnect pacing, subscribe handle
//!   - `bus`: Redis publish, subscribe and listener counts
//!   - `auth`: HTTP token issuance and identity lookup
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! DNSE broker --MQTT/WSS--> bounded queue --> workers (N) --> <env>.dnse.krx.<type>.<SYM>
//!
//! <env>.dnse.krx.tickers.events --> registry --> subscribe / unsubscribe
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::credential::{Credential, CredentialStore, IdentityMismatch};
pub use domain::streaming::{ChannelNamespace, ControlEvent, DataType, UpstreamMessage};
pub use domain::subscription::{FeedKind, Symbol};

// Ports
pub use application::ports::{
    AuthError, AuthPort, BusError, BusMessage, BusPort, UpstreamError, UpstreamPort,
};

// Services
pub use application::services::{
    ControlEventListener, IdleConfig, IdleMonitor, MessagePipeline, RefreshConfig,
    SessionManager, SessionState, SubscriptionRegistry, establish_credential,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, IngestionConfig};

// Adapters
pub use infrastructure::auth::HttpAuthClient;
pub use infrastructure::bus::RedisBus;
pub use infrastructure::mqtt::{ConnectError, MqttDriver, MqttSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
