//! Configuration Module
//!
//! Configuration loading for the ingester.

mod settings;

pub use settings::{
    AccountCredentials, AuthSettings, BrokerSettings, ConfigError, DEFAULT_AUTH_BASE_URL,
    DEFAULT_BROKER_HOST, IngestionConfig, PipelineSettings,
};
