//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Received, dropped and published counts
//! - **Session**: Upstream session state, reconnects, credential refreshes
//! - **Subscriptions**: Active symbols and downstream listener totals
//! - **Control**: Ticker event outcomes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until `init_metrics` installs the recorder.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::DataType;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the existing handle.
///
/// # Errors
///
/// Returns `BuildError` if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Message counters
    describe_counter!(
        "dnse_ingestion_messages_received_total",
        "Upstream messages accepted into the queue"
    );
    describe_counter!(
        "dnse_ingestion_messages_dropped_total",
        "Upstream messages dropped before publish"
    );
    describe_counter!(
        "dnse_ingestion_messages_published_total",
        "Messages published to the downstream bus"
    );
    describe_counter!(
        "dnse_ingestion_publish_errors_total",
        "Failed downstream publishes"
    );

    // Session
    describe_gauge!(
        "dnse_ingestion_session_state",
        "Upstream session state (0 disconnected, 1 connecting, 2 connected, 3 reconnecting)"
    );
    describe_counter!(
        "dnse_ingestion_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_counter!(
        "dnse_ingestion_credential_refresh_total",
        "Credential refresh attempts by outcome"
    );
    describe_counter!(
        "dnse_ingestion_upstream_errors_total",
        "Failed upstream subscribe/unsubscribe calls"
    );

    // Subscriptions
    describe_gauge!(
        "dnse_ingestion_active_symbols",
        "Symbols in the subscription registry"
    );
    describe_gauge!(
        "dnse_ingestion_downstream_listeners",
        "Downstream listeners across all data channels"
    );

    // Control
    describe_counter!(
        "dnse_ingestion_control_events_total",
        "Ticker control events by outcome"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Why a message never reached the bus.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Queue was at capacity.
    QueueFull,
    /// Topic had no known datatype or symbol.
    Unroutable,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Unroutable => "unroutable",
        }
    }
}

/// Credential refresh result.
#[derive(Debug, Clone, Copy)]
pub enum RefreshOutcome {
    /// Token swapped.
    Success,
    /// Auth service call failed.
    AuthFailed,
    /// Token resolved to another investor.
    IdentityMismatch,
}

impl RefreshOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AuthFailed => "auth_failed",
            Self::IdentityMismatch => "identity_mismatch",
        }
    }
}

/// Control event result.
#[derive(Debug, Clone, Copy)]
pub enum ControlOutcome {
    /// Registry changed.
    Applied,
    /// Symbol already in the requested state.
    Noop,
    /// Payload rejected.
    Invalid,
}

impl ControlOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Noop => "noop",
            Self::Invalid => "invalid",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a message accepted into the queue.
pub fn record_message_received() {
    counter!("dnse_ingestion_messages_received_total").increment(1);
}

/// Record a dropped message.
pub fn record_message_dropped(reason: DropReason) {
    counter!(
        "dnse_ingestion_messages_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a message published downstream.
pub fn record_message_published(datatype: DataType) {
    counter!(
        "dnse_ingestion_messages_published_total",
        "datatype" => datatype.as_str()
    )
    .increment(1);
}

/// Record a failed publish.
pub fn record_publish_error() {
    counter!("dnse_ingestion_publish_errors_total").increment(1);
}

/// Update the session state gauge.
pub fn set_session_state(value: f64) {
    gauge!("dnse_ingestion_session_state").set(value);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("dnse_ingestion_reconnects_total").increment(1);
}

/// Record a credential refresh attempt.
pub fn record_credential_refresh(outcome: RefreshOutcome) {
    counter!(
        "dnse_ingestion_credential_refresh_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a failed upstream subscribe or unsubscribe.
pub fn record_upstream_error(operation: &'static str) {
    counter!(
        "dnse_ingestion_upstream_errors_total",
        "operation" => operation
    )
    .increment(1);
}

/// Update the active symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_symbols(count: usize) {
    gauge!("dnse_ingestion_active_symbols").set(count as f64);
}

/// Update the downstream listener gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_downstream_listeners(count: u64) {
    gauge!("dnse_ingestion_downstream_listeners").set(count as f64);
}

/// Record a control event outcome.
pub fn record_control_event(outcome: ControlOutcome) {
    counter!(
        "dnse_ingestion_control_events_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
