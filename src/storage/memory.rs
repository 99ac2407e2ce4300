//! In-memory metrics store
//!
//! Keeps raw samples, aggregates and index entries in ordered maps behind
//! Tokio's async RwLock. Nothing survives a restart; use it for tests and
//! for ephemeral deployments.

use crate::storage::error::StorageResult;
use crate::storage::store::MetricsStore;
use crate::storage::types::{Aggregate, IndexEntry, Sample, Tier, TimeRange};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    /// (series_id, timestamp) → value
    raw: BTreeMap<(u32, i64), f64>,
    /// tier → (series_id, window start) → aggregate
    aggregates: HashMap<Tier, BTreeMap<(u32, i64), Aggregate>>,
    /// Ordered by (tier, window_start, series_id)
    index: BTreeSet<IndexEntry>,
}

/// Metrics store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of raw samples held
    pub async fn raw_count(&self) -> usize {
        self.state.read().await.raw.len()
    }

    /// Every aggregate stored at `tier`, ordered by (series, window)
    pub async fn all_aggregates(&self, tier: Tier) -> Vec<Aggregate> {
        let state = self.state.read().await;
        state
            .aggregates
            .get(&tier)
            .map(|rows| rows.values().copied().collect())
            .unwrap_or_default()
    }

    /// Every index entry currently present
    pub async fn all_index_entries(&self) -> Vec<IndexEntry> {
        self.state.read().await.index.iter().copied().collect()
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn insert_raw(&self, sample: &Sample) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .raw
            .insert((sample.series_id, sample.timestamp), sample.value);
        Ok(())
    }

    async fn insert_aggregate(&self, aggregate: &Aggregate) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .aggregates
            .entry(aggregate.tier)
            .or_default()
            .insert((aggregate.series_id, aggregate.timestamp), *aggregate);
        Ok(())
    }

    async fn find_raw(&self, series_ids: &[u32], range: TimeRange) -> StorageResult<Vec<Sample>> {
        let state = self.state.read().await;
        let mut samples: Vec<Sample> = series_ids
            .iter()
            .flat_map(|&id| {
                state
                    .raw
                    .range((id, range.start)..(id, range.end))
                    .map(move |(&(_, ts), &value)| Sample::new(id, ts, value))
            })
            .collect();
        samples.sort_by_key(|s| (s.timestamp, s.series_id));
        Ok(samples)
    }

    async fn find_aggregates(
        &self,
        tier: Tier,
        series_ids: &[u32],
        range: TimeRange,
    ) -> StorageResult<Vec<Aggregate>> {
        let state = self.state.read().await;
        let Some(rows) = state.aggregates.get(&tier) else {
            return Ok(Vec::new());
        };

        let mut aggregates: Vec<Aggregate> = series_ids
            .iter()
            .flat_map(|&id| {
                rows.range((id, range.start)..(id, range.end))
                    .map(|(_, agg)| *agg)
            })
            .collect();
        aggregates.sort_by_key(|a| (a.timestamp, a.series_id));
        Ok(aggregates)
    }

    async fn find_latest_raw(&self, series_id: u32) -> StorageResult<Option<Sample>> {
        let state = self.state.read().await;
        Ok(state
            .raw
            .range((series_id, i64::MIN)..=(series_id, i64::MAX))
            .next_back()
            .map(|(&(_, ts), &value)| Sample::new(series_id, ts, value)))
    }

    async fn upsert_index(&self, entries: &[IndexEntry]) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.index.extend(entries.iter().copied());
        Ok(())
    }

    async fn find_index_entries(
        &self,
        tier: Tier,
        window_start: i64,
    ) -> StorageResult<Vec<IndexEntry>> {
        let state = self.state.read().await;
        let from = IndexEntry::new(tier, window_start, u32::MIN);
        let to = IndexEntry::new(tier, window_start, u32::MAX);
        Ok(state.index.range(from..=to).copied().collect())
    }

    async fn delete_index_entries(&self, tier: Tier, window_start: i64) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .index
            .retain(|e| !(e.tier == tier && e.window_start == window_start));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raw_round_trip_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        for (ts, v) in [(300, 3.0), (100, 1.0), (200, 2.0), (400, 4.0)] {
            store.insert_raw(&Sample::new(1, ts, v)).await.unwrap();
        }
        store.insert_raw(&Sample::new(2, 150, 9.0)).await.unwrap();

        let samples = store
            .find_raw(&[1], TimeRange::new(100, 400))
            .await
            .unwrap();
        let ts: Vec<i64> = samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![100, 200, 300]);

        let group = store
            .find_raw(&[1, 2], TimeRange::new(0, 1000))
            .await
            .unwrap();
        assert_eq!(group.len(), 5);
        assert_eq!(group[1].series_id, 2);
    }

    #[tokio::test]
    async fn test_aggregate_overwrite() {
        let store = MemoryStore::new();
        store
            .insert_aggregate(&Aggregate::new(1, Tier::OneHour, 0, 1.0, 2.0, 1.5))
            .await
            .unwrap();
        store
            .insert_aggregate(&Aggregate::new(1, Tier::OneHour, 0, 0.0, 5.0, 2.5))
            .await
            .unwrap();

        let rows = store.all_aggregates(Tier::OneHour).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].max, 5.0);
        assert!(store.all_aggregates(Tier::SixHour).await.is_empty());
    }

    #[tokio::test]
    async fn test_index_lifecycle() {
        let store = MemoryStore::new();
        store
            .upsert_index(&[
                IndexEntry::new(Tier::Raw, 0, 2),
                IndexEntry::new(Tier::Raw, 0, 1),
                IndexEntry::new(Tier::Raw, 0, 1),
                IndexEntry::new(Tier::Raw, 3_600_000, 1),
                IndexEntry::new(Tier::OneHour, 0, 1),
            ])
            .await
            .unwrap();

        let entries = store.find_index_entries(Tier::Raw, 0).await.unwrap();
        let ids: Vec<u32> = entries.iter().map(|e| e.series_id).collect();
        assert_eq!(ids, vec![1, 2]);

        store.delete_index_entries(Tier::Raw, 0).await.unwrap();
        assert!(store.find_index_entries(Tier::Raw, 0).await.unwrap().is_empty());
        assert_eq!(store.all_index_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_raw() {
        let store = MemoryStore::new();
        assert!(store.find_latest_raw(7).await.unwrap().is_none());

        store.insert_raw(&Sample::new(7, 10, 1.0)).await.unwrap();
        store.insert_raw(&Sample::new(7, 30, 3.0)).await.unwrap();
        store.insert_raw(&Sample::new(8, 99, 9.0)).await.unwrap();

        let latest = store.find_latest_raw(7).await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 30);
        assert_eq!(latest.value, 3.0);
    }
}
