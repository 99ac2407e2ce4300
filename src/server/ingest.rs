//! Raw sample ingestion
//!
//! Every sample takes one permit from the server's pool before its insert is
//! spawned, which caps the number of writes in flight. The permit is owned by
//! the spawned task and is released before any callback runs.

use crate::rollup::hour_start;
use crate::server::error::{MetricsError, MetricsResult};
use crate::server::MetricsServer;
use crate::storage::{IndexEntry, Sample, Tier};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Receives per-sample and per-batch completion events
///
/// Methods may be called concurrently from different tasks.
pub trait IngestCallback: Send + Sync {
    fn on_success(&self, sample: &Sample);

    fn on_failure(&self, sample: &Sample, error: &MetricsError);

    /// Called exactly once per [`MetricsServer::ingest`] call, after the last sample
    fn on_finish(&self);
}

/// Final tally of a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestOutcome {
    pub succeeded: usize,
    pub failed: Vec<IngestFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub sample: Sample,
    pub error: String,
}

impl IngestOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Callback that records results and can be awaited
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use strata::server::{IngestTracker, MetricsServer};
/// # async fn demo(server: &MetricsServer, samples: Vec<strata::storage::Sample>) {
/// let tracker = Arc::new(IngestTracker::new());
/// server.ingest(samples, tracker.clone()).await.ok();
/// let outcome = tracker.wait().await;
/// println!("{} stored, {} failed", outcome.succeeded, outcome.failed.len());
/// # }
/// ```
#[derive(Default)]
pub struct IngestTracker {
    outcome: Mutex<IngestOutcome>,
    finished: AtomicUsize,
    notify: Notify,
}

impl IngestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the batch to finish and return its outcome
    pub async fn wait(&self) -> IngestOutcome {
        loop {
            let notified = self.notify.notified();
            if self.finished.load(Ordering::SeqCst) > 0 {
                break;
            }
            notified.await;
        }
        self.snapshot()
    }

    /// Number of `on_finish` calls seen
    pub fn finish_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> IngestOutcome {
        self.outcome
            .lock()
            .map(|outcome| outcome.clone())
            .unwrap_or_default()
    }
}

impl IngestCallback for IngestTracker {
    fn on_success(&self, _sample: &Sample) {
        if let Ok(mut outcome) = self.outcome.lock() {
            outcome.succeeded += 1;
        }
    }

    fn on_failure(&self, sample: &Sample, error: &MetricsError) {
        if let Ok(mut outcome) = self.outcome.lock() {
            outcome.failed.push(IngestFailure {
                sample: *sample,
                error: error.to_string(),
            });
        }
    }

    fn on_finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

impl MetricsServer {
    /// Persist a batch of raw samples
    ///
    /// Returns once every sample has been handed to a task, which may block
    /// while the permit pool is exhausted. Results arrive through `callback`.
    /// Fails with [`MetricsError::ShutDown`] without calling back if the
    /// server was already shut down.
    pub async fn ingest(
        &self,
        samples: Vec<Sample>,
        callback: Arc<dyn IngestCallback>,
    ) -> MetricsResult<()> {
        self.ensure_running()?;

        tracing::debug!(count = samples.len(), "Inserting raw samples");
        if samples.is_empty() {
            callback.on_finish();
            return Ok(());
        }

        let remaining = Arc::new(AtomicUsize::new(samples.len()));

        for sample in samples {
            let permit = if self.is_shut_down() {
                None
            } else {
                self.permits.clone().acquire_owned().await.ok()
            };

            let Some(permit) = permit else {
                callback.on_failure(&sample, &MetricsError::ShutDown);
                finish_one(&remaining, callback.as_ref());
                continue;
            };

            let store = self.store.clone();
            let callback = callback.clone();
            let remaining = remaining.clone();

            tokio::spawn(async move {
                let result = match store.insert_raw(&sample).await {
                    Ok(()) => {
                        let entry = IndexEntry::new(
                            Tier::Raw,
                            hour_start(sample.timestamp),
                            sample.series_id,
                        );
                        store.upsert_index(&[entry]).await.map_err(|e| {
                            tracing::error!(
                                series_id = sample.series_id,
                                timestamp = sample.timestamp,
                                error = %e,
                                "Failed to update index for raw sample"
                            );
                            MetricsError::from(e)
                        })
                    }
                    Err(e) => {
                        tracing::error!(
                            series_id = sample.series_id,
                            timestamp = sample.timestamp,
                            error = %e,
                            "Failed to insert raw sample"
                        );
                        Err(MetricsError::from(e))
                    }
                };
                drop(permit);

                match result {
                    Ok(()) => callback.on_success(&sample),
                    Err(e) => callback.on_failure(&sample, &e),
                }
                finish_one(&remaining, callback.as_ref());
            });
        }

        Ok(())
    }
}

fn finish_one(remaining: &AtomicUsize, callback: &dyn IngestCallback) {
    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        callback.on_finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::server::ServerOptions;
    use crate::storage::testing::FlakyStore;
    use crate::storage::{MemoryStore, MetricsStore, TimeRange};
    use std::time::Duration;

    const HOUR: i64 = 3_600_000;
    const BASE: i64 = 19_000 * 24 * HOUR;

    fn server(store: Arc<dyn MetricsStore>, permits: usize) -> MetricsServer {
        MetricsServer::new(
            store,
            Arc::new(ManualClock::new(BASE + 2 * HOUR)),
            ServerOptions {
                ingest_permits: permits,
                ..Default::default()
            },
        )
    }

    fn batch(series_id: u32, count: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| Sample::new(series_id, BASE + i as i64 * 1_000, i as f64))
            .collect()
    }

    #[tokio::test]
    async fn test_ingest_writes_samples_and_index() {
        let store = Arc::new(MemoryStore::new());
        let server = server(store.clone(), 100);

        let mut samples = batch(1, 10);
        samples.push(Sample::new(2, BASE + HOUR + 5, 1.5));
        let tracker = Arc::new(IngestTracker::new());
        server.ingest(samples, tracker.clone()).await.unwrap();

        let outcome = tracker.wait().await;
        assert_eq!(outcome.succeeded, 11);
        assert!(outcome.is_complete_success());
        assert_eq!(tracker.finish_count(), 1);

        assert_eq!(store.raw_count().await, 11);
        let entries = store.all_index_entries().await;
        assert_eq!(
            entries,
            vec![
                IndexEntry::new(Tier::Raw, BASE, 1),
                IndexEntry::new(Tier::Raw, BASE + HOUR, 2),
            ]
        );
        assert_eq!(server.available_permits(), 100);
    }

    #[tokio::test]
    async fn test_empty_batch_finishes_immediately() {
        let server = server(Arc::new(MemoryStore::new()), 4);
        let tracker = Arc::new(IngestTracker::new());

        server.ingest(Vec::new(), tracker.clone()).await.unwrap();
        assert_eq!(tracker.finish_count(), 1);
        assert_eq!(tracker.wait().await.succeeded, 0);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_permits_return() {
        let store = Arc::new(FlakyStore::new());
        store.fail_raw_inserts(2);
        let server = server(store.clone(), 8);

        let mut samples = batch(1, 20);
        samples.extend(batch(2, 5));
        let tracker = Arc::new(IngestTracker::new());
        server.ingest(samples, tracker.clone()).await.unwrap();

        let outcome = tracker.wait().await;
        assert_eq!(outcome.succeeded, 20);
        assert_eq!(outcome.failed.len(), 5);
        assert!(outcome.failed.iter().all(|f| f.sample.series_id == 2));
        assert_eq!(tracker.finish_count(), 1);
        assert_eq!(server.available_permits(), 8);

        // Failed inserts never reach the index
        let entries = store.inner.all_index_entries().await;
        assert!(entries.iter().all(|e| e.series_id == 1));
    }

    #[tokio::test]
    async fn test_index_failure_reports_sample_and_releases_permit() {
        let store = Arc::new(FlakyStore::new());
        store
            .fail_index_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let server = server(store.clone(), 3);

        let tracker = Arc::new(IngestTracker::new());
        server.ingest(batch(1, 6), tracker.clone()).await.unwrap();

        let outcome = tracker.wait().await;
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(outcome.failed.len(), 6);
        assert_eq!(tracker.finish_count(), 1);
        assert_eq!(server.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_capacity() {
        let store = Arc::new(FlakyStore::new());
        store.set_insert_delay(Duration::from_millis(5));
        let server = server(store.clone(), 4);

        let tracker = Arc::new(IngestTracker::new());
        server.ingest(batch(1, 40), tracker.clone()).await.unwrap();
        let outcome = tracker.wait().await;

        assert_eq!(outcome.succeeded, 40);
        assert!(store.max_in_flight() <= 4);
        assert!(store.max_in_flight() >= 1);
        assert_eq!(server.available_permits(), 4);

        let stored = store
            .inner
            .find_raw(&[1], TimeRange::new(BASE, BASE + HOUR))
            .await
            .unwrap();
        assert_eq!(stored.len(), 40);
    }

    #[tokio::test]
    async fn test_ingest_after_shutdown() {
        let server = server(Arc::new(MemoryStore::new()), 4);
        server.shutdown().await.unwrap();

        let tracker = Arc::new(IngestTracker::new());
        let result = server.ingest(batch(1, 3), tracker.clone()).await;
        assert!(matches!(result, Err(MetricsError::ShutDown)));
        assert_eq!(tracker.finish_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_inserts() {
        let store = Arc::new(FlakyStore::new());
        store.set_insert_delay(Duration::from_millis(20));
        let server = Arc::new(server(store.clone(), 2));

        let tracker = Arc::new(IngestTracker::new());
        let ingesting = {
            let server = server.clone();
            let tracker = tracker.clone();
            tokio::spawn(async move { server.ingest(batch(1, 10), tracker).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        server.shutdown().await.unwrap();
        ingesting.await.unwrap().unwrap();

        let outcome = tracker.wait().await;
        assert_eq!(tracker.finish_count(), 1);
        assert_eq!(outcome.succeeded + outcome.failed.len(), 10);
        assert!(outcome
            .failed
            .iter()
            .all(|f| f.error == MetricsError::ShutDown.to_string()));
        // Everything that reported success is in the store
        assert_eq!(store.inner.raw_count().await, outcome.succeeded);
    }
}
