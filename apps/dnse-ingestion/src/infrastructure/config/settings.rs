//! Ingestion Configuration Settings
//!
//! Configuration types for the ingester, loaded from environment variables.

use std::time::Duration;

use crate::application::services::idle::IdleConfig;
use crate::application::services::session::RefreshConfig;
use crate::infrastructure::mqtt::ReconnectConfig;

/// Default auth service base URL.
pub const DEFAULT_AUTH_BASE_URL: &str = "https://api.dnse.com.vn/user-service";

/// Default market data broker host.
pub const DEFAULT_BROKER_HOST: &str = "datafeed-lts-krx.dnse.com.vn";

/// Account credentials for the auth service.
#[derive(Clone)]
pub struct AccountCredentials {
    username: String,
    password: String,
}

impl AccountCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Get the account username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the account password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Auth service settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Base URL; `/api/auth` and `/api/me` are appended.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Upstream broker settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// WebSocket path.
    pub path: String,
    /// Client identifier prefix; a random suffix is appended per process.
    pub client_id_prefix: String,
    /// Protocol keep-alive.
    pub keep_alive: Duration,
    /// Time allowed for the initial handshake.
    pub connect_timeout: Duration,
    /// Initial delay between reconnect attempts.
    pub reconnect_delay_initial: Duration,
    /// Maximum delay between reconnect attempts.
    pub reconnect_delay_max: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: 443,
            path: "/wss".to_string(),
            client_id_prefix: "dnse-user-client-mkv-".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
        }
    }
}

impl BrokerSettings {
    /// Secure WebSocket URL of the broker.
    #[must_use]
    pub fn url(&self) -> String {
        format!("wss://{}:{}{}", self.host, self.port, self.path)
    }

    /// Backoff between reconnect attempts.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: self.reconnect_delay_initial,
            max_delay: self.reconnect_delay_max,
            ..ReconnectConfig::default()
        }
    }
}

/// Message pipeline sizing.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Publishing worker count.
    pub workers: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 10_000,
        }
    }
}

/// Complete ingester configuration.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Deployment environment tag, first segment of every channel name.
    pub env: String,
    /// Account credentials.
    pub credentials: AccountCredentials,
    /// Downstream bus address.
    pub redis_addr: String,
    /// Auth service settings.
    pub auth: AuthSettings,
    /// Upstream broker settings.
    pub broker: BrokerSettings,
    /// Credential refresh wait.
    pub refresh: RefreshConfig,
    /// Pipeline sizing.
    pub pipeline: PipelineSettings,
    /// Idle shutdown settings.
    pub idle: IdleConfig,
    /// Symbols active from startup.
    pub seed_symbols: Vec<String>,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl IngestionConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = required_env("USR")?;
        let password = required_env("PASSWD")?;
        let redis_addr = required_env("REDIS_ADDR")?;
        let env = required_env("ENV")?;

        let auth_defaults = AuthSettings::default();
        let auth = AuthSettings {
            base_url: std::env::var("DNSE_AUTH_BASE_URL").unwrap_or(auth_defaults.base_url),
            timeout: parse_env_duration_secs("DNSE_HTTP_TIMEOUT_SECS", auth_defaults.timeout),
        };

        let broker_defaults = BrokerSettings::default();
        let broker = BrokerSettings {
            host: std::env::var("DNSE_BROKER_HOST").unwrap_or(broker_defaults.host),
            port: parse_env_u16("DNSE_BROKER_PORT", broker_defaults.port),
            path: std::env::var("DNSE_BROKER_PATH").unwrap_or(broker_defaults.path),
            client_id_prefix: std::env::var("DNSE_CLIENT_ID_PREFIX")
                .unwrap_or(broker_defaults.client_id_prefix),
            keep_alive: parse_env_duration_secs(
                "INGEST_KEEP_ALIVE_SECS",
                broker_defaults.keep_alive,
            ),
            connect_timeout: parse_env_duration_secs(
                "INGEST_CONNECT_TIMEOUT_SECS",
                broker_defaults.connect_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "INGEST_RECONNECT_DELAY_INITIAL_MS",
                broker_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "INGEST_RECONNECT_DELAY_MAX_SECS",
                broker_defaults.reconnect_delay_max,
            ),
        };

        let refresh_defaults = RefreshConfig::default();
        let refresh = RefreshConfig {
            timeout: parse_env_duration_secs(
                "INGEST_REFRESH_TIMEOUT_SECS",
                refresh_defaults.timeout,
            ),
            poll_interval: parse_env_duration_millis(
                "INGEST_REFRESH_POLL_MILLIS",
                refresh_defaults.poll_interval,
            ),
        };

        let pipeline_defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            workers: parse_env_usize("INGEST_WORKERS", pipeline_defaults.workers),
            queue_capacity: parse_env_usize(
                "INGEST_QUEUE_CAPACITY",
                pipeline_defaults.queue_capacity,
            ),
        };

        let idle_defaults = IdleConfig::default();
        let idle = IdleConfig {
            interval: parse_env_duration_secs("INGEST_IDLE_INTERVAL_SECS", idle_defaults.interval),
            threshold: parse_env_duration_secs(
                "INGEST_IDLE_THRESHOLD_SECS",
                idle_defaults.threshold,
            ),
        };

        let seed_symbols = std::env::var("INGEST_SEED_SYMBOLS")
            .map(|raw| parse_symbol_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            env,
            credentials: AccountCredentials::new(username, password),
            redis_addr,
            auth,
            broker,
            refresh,
            pipeline,
            idle,
            seed_symbols,
            health_port: parse_env_u16("INGEST_HEALTH_PORT", 8083),
        })
    }

    /// Redis connection URL for the configured address.
    ///
    /// A bare `host:port` is given the `redis://` scheme.
    #[must_use]
    pub fn redis_url(&self) -> String {
        if self.redis_addr.contains("://") {
            self.redis_addr.clone()
        } else {
            format!("redis://{}", self.redis_addr)
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    let value = std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
