//! Health and Metrics HTTP Surface
//!
//! Small axum app on the health port for probes and scraping.
//!
//! - `GET /health`: JSON report of the upstream session, registry, queue and bus
//! - `GET /healthz`: liveness, always `200 OK` while the process serves HTTP
//! - `GET /readyz`: `200` only when the session is connected and Redis answers `PING`
//! - `GET /metrics`: Prometheus text exposition

use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::BusPort;
use crate::application::services::pipeline::MessagePipeline;
use crate::application::services::registry::SubscriptionRegistry;
use crate::application::services::session::{SessionManager, SessionState};
use crate::infrastructure::metrics::get_metrics_handle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Report
// =============================================================================

/// `/health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall verdict.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Seconds since the health state was created.
    pub uptime_secs: u64,
    /// When this report was produced.
    pub checked_at: DateTime<Utc>,
    /// Upstream session.
    pub upstream: UpstreamReport,
    /// Downstream bus.
    pub bus: BusReport,
    /// Message pipeline.
    pub pipeline: PipelineReport,
}

/// Overall verdict derived from the upstream session and the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Session connected and bus reachable.
    Healthy,
    /// Exactly one of the two is down.
    Degraded,
    /// Both are down.
    Unhealthy,
}

impl HealthStatus {
    /// Combine the two dependency checks.
    #[must_use]
    pub const fn from_checks(upstream_connected: bool, bus_reachable: bool) -> Self {
        match (upstream_connected, bus_reachable) {
            (true, true) => Self::Healthy,
            (false, false) => Self::Unhealthy,
            _ => Self::Degraded,
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Upstream session section.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamReport {
    /// Session state name.
    pub state: &'static str,
    /// Whether registry changes currently reach the broker.
    pub connected: bool,
    /// Reconnect attempts since startup.
    pub reconnect_attempts: u64,
    /// Symbols in the registry.
    pub active_symbols: usize,
}

/// Downstream bus section.
#[derive(Debug, Clone, Serialize)]
pub struct BusReport {
    /// Whether `PING` succeeded.
    pub reachable: bool,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Pipeline section.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Messages waiting in the queue.
    pub queue_depth: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Messages accepted from upstream.
    pub enqueued: u64,
    /// Messages dropped on a full queue.
    pub dropped: u64,
    /// Messages published downstream.
    pub published: u64,
    /// Publish calls that failed.
    pub publish_errors: u64,
}

// =============================================================================
// State
// =============================================================================

/// Handles the health endpoints read from.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    session: Arc<SessionManager>,
    registry: Arc<SubscriptionRegistry>,
    pipeline: MessagePipeline,
    bus: Arc<dyn BusPort>,
}

impl HealthServerState {
    /// Capture the handles; uptime counts from here.
    #[must_use]
    pub fn new(
        version: String,
        session: Arc<SessionManager>,
        registry: Arc<SubscriptionRegistry>,
        pipeline: MessagePipeline,
        bus: Arc<dyn BusPort>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            session,
            registry,
            pipeline,
            bus,
        }
    }

    fn upstream(&self) -> UpstreamReport {
        let state = self.session.state();
        UpstreamReport {
            state: state.as_str(),
            connected: state == SessionState::Connected,
            reconnect_attempts: self.session.reconnect_attempts(),
            active_symbols: self.registry.len(),
        }
    }

    async fn bus(&self) -> BusReport {
        match self.bus.health_check().await {
            Ok(()) => BusReport {
                reachable: true,
                error: None,
            },
            Err(e) => BusReport {
                reachable: false,
                error: Some(e.to_string()),
            },
        }
    }

    fn pipeline(&self) -> PipelineReport {
        let stats = self.pipeline.stats();
        PipelineReport {
            queue_depth: self.pipeline.depth(),
            queue_capacity: self.pipeline.capacity(),
            enqueued: stats.enqueued(),
            dropped: stats.dropped(),
            published: stats.published(),
            publish_errors: stats.publish_errors(),
        }
    }

    async fn report(&self) -> HealthReport {
        let upstream = self.upstream();
        let bus = self.bus().await;
        HealthReport {
            status: HealthStatus::from_checks(upstream.connected, bus.reachable),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            checked_at: Utc::now(),
            upstream,
            bus,
            pipeline: self.pipeline(),
        }
    }

    async fn ready(&self) -> bool {
        self.session.state() == SessionState::Connected && self.bus.health_check().await.is_ok()
    }
}

// =============================================================================
// Server
// =============================================================================

/// Health HTTP server bound to `0.0.0.0:<port>`.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a server that stops when `cancel` fires.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::Bind` if the port is taken and
    /// `HealthServerError::Serve` if the accept loop fails.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|source| HealthServerError::Bind {
                port: self.port,
                source,
            })?;
        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes for the health surface.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = state.report().await;
    (report.status.http_status(), Json(report)).into_response()
}

async fn ready(State(state): State<Arc<HealthServerState>>) -> Response {
    if state.ready().await {
        (StatusCode::OK, "READY").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY").into_response()
    }
}

async fn metrics() -> Response {
    match get_metrics_handle() {
        Some(handle) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Listener could not bind.
    #[error("failed to bind health port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// Accept loop failed.
    #[error("health server failed")]
    Serve(#[source] io::Error),
}

// =============================================================================
// Tests
// =============================================================================
