//! Domain Layer - Core ingestion types and business rules.
//!
//! This layer contains the pure types of the ingester: ticker symbols and
//! their upstream topics, channel naming for the downstream bus, and the
//! credential held for the upstream session. Nothing here performs I/O.

/// Upstream credential and the store that rotates its token.
pub mod credential;

/// Upstream message classification and downstream channel naming.
pub mod streaming;

/// Ticker symbols and the upstream topics subscribed per symbol.
pub mod subscription;
