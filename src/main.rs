//! Strata Server
//!
//! Run with: cargo run --bin strata [-- path/to/config.toml]
//!
//! Without a path the config is read from the default locations
//! (see [`Config::load_default`]) and `STRATA_*` environment variables.
//! `RUST_LOG` overrides the configured log level.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strata::api::{self, AppState};
use strata::clock::{Clock, SystemClock};
use strata::config::{Config, StorageBackend};
use strata::server::{MetricsError, MetricsServer};
use strata::storage::{MemoryStore, MetricsStore, SqliteStore, Tier};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Config::load_with_env(&path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => Config::load_default(),
    };

    init_logging(&config);

    tracing::info!("Starting Strata v{}", env!("CARGO_PKG_VERSION"));

    let (store, is_fresh_install) = open_store(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let options = config.server_options()?;
    let install_time = config.metrics.install_time.unwrap_or_else(|| {
        clock.now_millis() - options.retention.retention(Tier::Raw).num_milliseconds()
    });

    let server = Arc::new(MetricsServer::new(store, clock, options));
    server.init(is_fresh_install, install_time).await?;

    let ticker = spawn_aggregation_ticker(
        Arc::clone(&server),
        Duration::from_secs(config.metrics.aggregation_interval_secs),
    );

    let api_config = api::ApiConfig::new(config.api.host.clone(), config.api.port);
    let state = AppState::new(Arc::clone(&server), api_config.clone());

    api::serve(state, &api_config).await?;

    tracing::info!("Shutting down...");
    server.shutdown().await?;
    ticker.abort();

    tracing::info!("Strata stopped");
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "strata={},tower_http=info",
            config.logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Open the configured store; the flag is true when no database existed yet
fn open_store(config: &Config) -> anyhow::Result<(Arc<dyn MetricsStore>, bool)> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store, data will not survive a restart");
            Ok((Arc::new(MemoryStore::new()), true))
        }
        StorageBackend::Sqlite => {
            let data_dir = config.storage.data_path();
            let is_fresh_install = !data_dir.join("metrics.db").exists();
            tracing::info!(
                data_dir = %data_dir.display(),
                is_fresh_install,
                "Opening SQLite store"
            );
            let store = SqliteStore::open(&data_dir)
                .with_context(|| format!("opening store in {:?}", data_dir))?;
            Ok((Arc::new(store), is_fresh_install))
        }
    }
}

fn spawn_aggregation_ticker(
    server: Arc<MetricsServer>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;

            match server.run_aggregation_pass().await {
                Ok(reports) => {
                    tracing::debug!(passes = reports.len(), "Aggregation tick finished");
                }
                Err(MetricsError::AggregationInProgress) => {
                    tracing::debug!("Aggregation already running, skipping tick");
                }
                Err(MetricsError::ShutDown) => break,
                Err(e) => {
                    tracing::error!("Aggregation tick failed: {}", e);
                }
            }
        }
    })
}
