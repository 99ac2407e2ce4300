//! Metrics store contract
//!
//! The engine talks to its backing store only through [`MetricsStore`]. Every
//! operation is async; implementations decide how the I/O is performed.

use crate::storage::error::StorageResult;
use crate::storage::types::{Aggregate, IndexEntry, Sample, Tier, TimeRange};
use async_trait::async_trait;

/// Async point and index storage used by ingestion, rollup and queries
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Persist one raw sample. Writing the same (series, timestamp) again replaces it.
    async fn insert_raw(&self, sample: &Sample) -> StorageResult<()>;

    /// Persist an aggregate, overwriting any existing row for the same
    /// (series, tier, window)
    async fn insert_aggregate(&self, aggregate: &Aggregate) -> StorageResult<()>;

    /// Raw samples for the given series in `range`, ordered by timestamp
    async fn find_raw(&self, series_ids: &[u32], range: TimeRange) -> StorageResult<Vec<Sample>>;

    /// Aggregates at `tier` for the given series in `range`, ordered by timestamp
    async fn find_aggregates(
        &self,
        tier: Tier,
        series_ids: &[u32],
        range: TimeRange,
    ) -> StorageResult<Vec<Aggregate>>;

    /// The most recent raw sample of a series, if any
    async fn find_latest_raw(&self, series_id: u32) -> StorageResult<Option<Sample>>;

    /// Insert index entries, ignoring ones that already exist
    async fn upsert_index(&self, entries: &[IndexEntry]) -> StorageResult<()>;

    /// All index entries of `tier` in the window starting at `window_start`,
    /// ordered by series id
    async fn find_index_entries(&self, tier: Tier, window_start: i64)
        -> StorageResult<Vec<IndexEntry>>;

    /// Delete every index entry of `tier` in one window, across all series
    async fn delete_index_entries(&self, tier: Tier, window_start: i64) -> StorageResult<()>;

    /// Flush and release resources. Called once on engine shutdown.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
