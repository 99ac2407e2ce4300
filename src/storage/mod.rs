//! Strata Storage Layer
//!
//! This module provides the persistence contract and its backends:
//!
//! - **types**: Core data structures (Sample, Tier, Aggregate, IndexEntry, TimeRange)
//! - **store**: The async `MetricsStore` trait the engine is written against
//! - **sqlite**: Durable SQLite backend
//! - **memory**: In-process backend for tests and ephemeral use
//! - **error**: Error types
//!
//! # Layout
//!
//! ```text
//! raw samples ──► raw_metrics
//!                    │  (index: tier=raw, hourly windows)
//!                    ▼
//!              aggregates[one_hour] ──► aggregates[six_hour] ──► aggregates[twenty_four_hour]
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use strata::storage::{MetricsStore, Sample, SqliteStore, TimeRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::open(std::path::Path::new("./data"))?;
//!     store.insert_raw(&Sample::new(1, 1_700_000_000_000, 42.0)).await?;
//!
//!     let range = TimeRange::new(1_699_999_000_000, 1_700_001_000_000);
//!     let samples = store.find_raw(&[1], range).await?;
//!     println!("{} samples", samples.len());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::MetricsStore;
pub use types::{Aggregate, IndexEntry, Sample, Tier, TimeRange};
