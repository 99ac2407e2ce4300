//! Fault-injecting store used by engine tests

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::memory::MemoryStore;
use crate::storage::store::MetricsStore;
use crate::storage::types::{Aggregate, IndexEntry, Sample, Tier, TimeRange};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Wraps a [`MemoryStore`] and fails or delays selected operations on demand
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    /// Raw inserts for these series fail
    pub fail_raw_for: Mutex<HashSet<u32>>,
    /// Raw and aggregate reads touching these series fail
    pub fail_reads_for: Mutex<HashSet<u32>>,
    pub fail_index_writes: AtomicBool,
    pub fail_aggregate_writes: AtomicBool,
    /// Sleep inside every raw insert
    pub insert_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_raw_inserts(&self, series_id: u32) {
        self.fail_raw_for.lock().unwrap().insert(series_id);
    }

    pub fn fail_reads(&self, series_id: u32) {
        self.fail_reads_for.lock().unwrap().insert(series_id);
    }

    pub fn heal(&self) {
        self.fail_raw_for.lock().unwrap().clear();
        self.fail_reads_for.lock().unwrap().clear();
        self.fail_index_writes.store(false, Ordering::SeqCst);
        self.fail_aggregate_writes.store(false, Ordering::SeqCst);
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        *self.insert_delay.lock().unwrap() = Some(delay);
    }

    /// Highest number of raw inserts observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check_reads(&self, series_ids: &[u32]) -> StorageResult<()> {
        let failing = self.fail_reads_for.lock().unwrap();
        if series_ids.iter().any(|id| failing.contains(id)) {
            return Err(StorageError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsStore for FlakyStore {
    async fn insert_raw(&self, sample: &Sample) -> StorageResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.insert_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fail = self.fail_raw_for.lock().unwrap().contains(&sample.series_id);
        let result = if fail {
            Err(StorageError::Unavailable("injected insert failure".to_string()))
        } else {
            self.inner.insert_raw(sample).await
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn insert_aggregate(&self, aggregate: &Aggregate) -> StorageResult<()> {
        if self.fail_aggregate_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected aggregate failure".to_string()));
        }
        self.inner.insert_aggregate(aggregate).await
    }

    async fn find_raw(&self, series_ids: &[u32], range: TimeRange) -> StorageResult<Vec<Sample>> {
        self.check_reads(series_ids)?;
        self.inner.find_raw(series_ids, range).await
    }

    async fn find_aggregates(
        &self,
        tier: Tier,
        series_ids: &[u32],
        range: TimeRange,
    ) -> StorageResult<Vec<Aggregate>> {
        self.check_reads(series_ids)?;
        self.inner.find_aggregates(tier, series_ids, range).await
    }

    async fn find_latest_raw(&self, series_id: u32) -> StorageResult<Option<Sample>> {
        self.check_reads(&[series_id])?;
        self.inner.find_latest_raw(series_id).await
    }

    async fn upsert_index(&self, entries: &[IndexEntry]) -> StorageResult<()> {
        if self.fail_index_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected index failure".to_string()));
        }
        self.inner.upsert_index(entries).await
    }

    async fn find_index_entries(
        &self,
        tier: Tier,
        window_start: i64,
    ) -> StorageResult<Vec<IndexEntry>> {
        self.inner.find_index_entries(tier, window_start).await
    }

    async fn delete_index_entries(&self, tier: Tier, window_start: i64) -> StorageResult<()> {
        self.inner.delete_index_entries(tier, window_start).await
    }
}
