//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// HTTP auth service client.
pub mod auth;

/// Redis pub/sub bus adapter.
pub mod bus;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// MQTT v5 upstream session driver.
pub mod mqtt;

/// OpenTelemetry tracing integration.
pub mod telemetry;
