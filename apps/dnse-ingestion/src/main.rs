//! DNSE Ingestion Binary
//!
//! Starts the KRX market data ingester.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dnse-ingestion
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `USR`: DNSE account username
//! - `PASSWD`: DNSE account password
//! - `REDIS_ADDR`: Redis address (`host:port` or `redis://` URL)
//! - `ENV`: Deployment environment tag, first segment of every channel name
//!
//! ## Optional
//! - `DNSE_BROKER_HOST`: Market data broker host (default: datafeed-lts-krx.dnse.com.vn)
//! - `INGEST_WORKERS`: Publishing workers (default: 4)
//! - `INGEST_QUEUE_CAPACITY`: Message queue capacity (default: 10000)
//! - `INGEST_IDLE_THRESHOLD_SECS`: Idle time before shutdown (default: 300)
//! - `INGEST_SEED_SYMBOLS`: Comma-separated symbols active at startup
//! - `INGEST_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dnse_ingestion::application::services::PipelineQueue;
use dnse_ingestion::infrastructure::health::{HealthServer, HealthServerState};
use dnse_ingestion::infrastructure::telemetry;
use dnse_ingestion::{
    BusPort, ChannelNamespace, ControlEventListener, CredentialStore, HttpAuthClient, IdleMonitor,
    IngestionConfig, MessagePipeline, MqttDriver, MqttSettings, RedisBus, SessionManager,
    SubscriptionRegistry, establish_credential, init_metrics,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bound on waiting for the upstream session to close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let telemetry = telemetry::init();

    tracing::info!(otlp_export = telemetry.exporting(), "Starting DNSE ingestion");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics recorder not installed");
    }

    let config = IngestionConfig::from_env().context("loading configuration")?;
    log_config(&config);

    let auth = HttpAuthClient::from_settings(&config.auth).context("building auth client")?;
    let credential = establish_credential(
        &auth,
        config.credentials.username(),
        config.credentials.password(),
    )
    .await
    .context("authenticating account")?;
    let credentials = Arc::new(CredentialStore::new(credential));

    let bus: Arc<dyn BusPort> = Arc::new(
        RedisBus::connect(&config.redis_url())
            .await
            .context("connecting to Redis")?,
    );

    let shutdown = CancellationToken::new();
    let namespace = ChannelNamespace::dnse_krx(config.env.clone());
    let registry = Arc::new(SubscriptionRegistry::seeded(&config.seed_symbols));

    let (pipeline, queue) = MessagePipeline::new(config.pipeline.queue_capacity);
    let workers = start_workers(queue, &config, &bus, &namespace, &shutdown);

    let session = Arc::new(SessionManager::new(
        Arc::clone(&registry),
        credentials,
        Arc::new(auth),
        config.refresh,
        shutdown.clone(),
    ));

    let driver = MqttDriver::new(
        MqttSettings::from(&config.broker),
        Arc::clone(&session),
        pipeline.clone(),
    );
    let driver_task = driver
        .connect(shutdown.clone())
        .await
        .context("connecting to market data broker")?;

    let listener = ControlEventListener::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        Arc::clone(&session),
        &namespace,
    );
    let listener_cancel = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = listener.run(listener_cancel).await {
            tracing::error!(error = %e, "Control event listener failed");
        }
    });

    let idle = CancellationToken::new();
    let monitor = IdleMonitor::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        namespace,
        config.idle,
    );
    tokio::spawn(monitor.run(idle.clone(), shutdown.clone()));

    if config.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&session),
            Arc::clone(&registry),
            pipeline,
            Arc::clone(&bus),
        ));
        let health_server = HealthServer::new(config.health_port, health_state, shutdown.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tracing::info!(symbols = registry.len(), "DNSE ingestion ready");

    await_shutdown(idle, shutdown).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, driver_task).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Upstream session did not close in time"
        );
    }
    for worker in workers {
        let _ = worker.await;
    }

    tracing::info!("DNSE ingestion stopped");
    Ok(())
}

fn start_workers(
    queue: PipelineQueue,
    config: &IngestionConfig,
    bus: &Arc<dyn BusPort>,
    namespace: &ChannelNamespace,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let workers = queue.spawn_workers(
        config.pipeline.workers,
        Arc::clone(bus),
        namespace.clone(),
        shutdown.clone(),
    );
    tracing::info!(
        workers = workers.len(),
        capacity = config.pipeline.queue_capacity,
        "Publish workers started"
    );
    workers
}

/// Log the parsed configuration.
fn log_config(config: &IngestionConfig) {
    tracing::info!(
        env = %config.env,
        broker = %config.broker.url(),
        workers = config.pipeline.workers,
        queue_capacity = config.pipeline.queue_capacity,
        seed_symbols = config.seed_symbols.len(),
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        auth_base_url = %config.auth.base_url,
        idle_threshold_secs = config.idle.threshold.as_secs(),
        "Collaborator endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for idle expiry or a shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(idle: CancellationToken, shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = idle.cancelled() => {
            tracing::info!("Downstream idle, initiating shutdown");
        }
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown.cancel();
}
