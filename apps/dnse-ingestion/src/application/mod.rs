//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (auth, bus, upstream broker).
pub mod ports;

/// Application services: registry, session, pipeline, control, idle.
pub mod services;
