//! # Strata
//!
//! Time-series ingestion and rollup engine. Raw samples are stored as they
//! arrive and rolled up hour by hour into 1h, 6h and 24h aggregates, so
//! queries over long spans read a handful of pre-computed points instead of
//! every raw sample.
//!
//! ## Features
//!
//! - **Bounded ingestion**: A permit pool caps concurrent raw inserts
//! - **Index-driven rollups**: Only windows that received data are aggregated
//! - **Crash catch-up**: Hours missed while the server was down are replayed on start
//! - **Age-routed queries**: Each query reads the finest tier still retained for its span
//! - **Downsampling**: Fixed-count buckets for charting
//!
//! ## Modules
//!
//! - [`storage`]: Persistence contract with SQLite and in-memory backends
//! - [`rollup`]: Window alignment, accumulators, buckets and the aggregation pipeline
//! - [`server`]: Ingest, query and aggregation front end
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::clock::SystemClock;
//! use strata::server::{IngestTracker, MetricsServer, ServerOptions};
//! use strata::storage::{Sample, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::open(std::path::Path::new("./strata_data"))?);
//!     let server = MetricsServer::new(store, Arc::new(SystemClock), ServerOptions::default());
//!     server.init(true, 0).await?;
//!
//!     // Ingest a batch
//!     let now = server.now_millis();
//!     let tracker = Arc::new(IngestTracker::new());
//!     server
//!         .ingest(vec![Sample::new(1, now, 7.5)], tracker.clone())
//!         .await?;
//!     let outcome = tracker.wait().await;
//!     println!("{} stored", outcome.succeeded);
//!
//!     // Summarize the last hour
//!     let summary = server
//!         .summary_aggregate(1, now - 3_600_000, now + 1)
//!         .await?;
//!     println!("avg {} over {} points", summary.avg, summary.count);
//!
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod clock;
pub mod config;
pub mod rollup;
pub mod server;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Aggregate, IndexEntry, MemoryStore, MetricsStore, Sample, SqliteStore, StorageError,
    StorageResult, Tier, TimeRange,
};

pub use rollup::{
    AggregationReport, Bucket, Buckets, TimeSlicePolicy, TransitionReport, TransitionStatus,
};

pub use server::{
    IngestCallback, IngestOutcome, IngestTracker, MetricsError, MetricsResult, MetricsServer,
    ServerOptions, Summary,
};

pub use api::{build_router, serve, ApiError, AppState};

pub use clock::{Clock, ManualClock, SystemClock};

pub use config::{Config, ConfigError, LoggingConfig, RetentionConfig, StorageBackend};
