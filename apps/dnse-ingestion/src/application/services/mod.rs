//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionRegistry`: Active symbols, reconciled on every connect
//! - `SessionManager`: Upstream session state machine and credential refresh
//! - `MessagePipeline`: Bounded queue and publishing worker pool
//! - `ControlEventListener`: Applies symbol activation events
//! - `IdleMonitor`: Shuts down after sustained downstream idleness

pub mod control;
pub mod idle;
pub mod pipeline;
pub mod registry;
pub mod session;

pub use control::ControlEventListener;
pub use idle::{IdleConfig, IdleMonitor, IdleTracker, IdleVerdict};
pub use pipeline::{MessagePipeline, Offer, PipelineQueue, PipelineStats};
pub use registry::{RegistryChange, SubscriptionRegistry};
pub use session::{
    RefreshConfig, RefreshError, SessionManager, SessionState, WatchOutcome, establish_credential,
};
