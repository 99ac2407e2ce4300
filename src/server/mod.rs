//! Strata Metrics Server
//!
//! The server orchestrates all components:
//! - Write path: Sample → permit → MetricsStore (raw) → raw index entry → callback
//! - Rollup path: trigger → replay of missed or failed hours → current-hour pass
//! - Read path: begin time → tier → raw samples or aggregates → fold or buckets
//!
//! Owned by the process as an `Arc<MetricsServer>`; all methods take `&self`.

pub mod error;
pub mod ingest;
pub mod query;

pub use error::{MetricsError, MetricsResult};
pub use ingest::{IngestCallback, IngestOutcome, IngestTracker};
pub use query::Summary;

use crate::clock::Clock;
use crate::rollup::{hour_start, AggregationReport, Aggregator, TimeSlicePolicy};
use crate::storage::{MetricsStore, Tier};
use chrono::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Largest ingest pool the server will build; larger requests are clamped
pub const MAX_INGEST_PERMITS: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

/// Runtime options for the server
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Maximum raw inserts in flight at once (default: 100)
    pub ingest_permits: usize,
    /// Tier retention used to route queries
    pub retention: TimeSlicePolicy,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            ingest_permits: 100,
            retention: TimeSlicePolicy::default(),
        }
    }
}

/// Ingestion, rollup and query front end over a [`MetricsStore`]
pub struct MetricsServer {
    store: Arc<dyn MetricsStore>,
    clock: Arc<dyn Clock>,
    policy: TimeSlicePolicy,
    aggregator: Aggregator,
    permits: Arc<Semaphore>,
    capacity: usize,
    shut_down: AtomicBool,
    /// Root of the first pass the next trigger must run. Set by startup
    /// catch-up, by a failed transition, or one hour past the last root run.
    replay_from: Mutex<Option<i64>>,
    pass_lock: tokio::sync::Mutex<()>,
}

impl MetricsServer {
    pub fn new(store: Arc<dyn MetricsStore>, clock: Arc<dyn Clock>, options: ServerOptions) -> Self {
        let capacity = options.ingest_permits.clamp(1, MAX_INGEST_PERMITS);
        Self {
            aggregator: Aggregator::new(store.clone()),
            store,
            clock,
            policy: options.retention,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            shut_down: AtomicBool::new(false),
            replay_from: Mutex::new(None),
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Prepare the server after start
    ///
    /// On an existing installation this probes the raw index backward from
    /// the previous hour, down to `install_time`, to find the most recent raw
    /// data written before the last shutdown. If that data is older than the
    /// current hour, the next aggregation pass first catches up on it.
    pub async fn init(&self, is_fresh_install: bool, install_time: i64) -> MetricsResult<()> {
        self.ensure_running()?;
        if is_fresh_install {
            tracing::info!("Fresh install, skipping raw data probe");
            return Ok(());
        }

        let hour = Duration::hours(1).num_milliseconds();
        let current_hour = self.current_hour();
        let mut probe = current_hour - hour;

        let mut found = None;
        loop {
            if !self
                .store
                .find_index_entries(Tier::Raw, probe)
                .await?
                .is_empty()
            {
                found = Some(probe);
                break;
            }
            if probe < install_time {
                break;
            }
            probe -= hour;
        }

        match found {
            None => {
                tracing::info!("No raw data since last shutdown, aggregates are up to date");
            }
            Some(marker) if hour_start(marker) == current_hour => {
                tracing::info!("Raw data aggregates are up to date");
            }
            Some(marker) => {
                tracing::info!(
                    marker,
                    "Found raw data from before startup, it will be aggregated on the next pass"
                );
                *self.lock_replay()? = Some(hour_start(marker) + hour);
            }
        }

        Ok(())
    }

    /// Run every aggregation pass that is due
    ///
    /// Every hour root since the last one run is replayed before the pass for
    /// the current hour: hours missed while the process was down, hours whose
    /// ticks were skipped, and the root of the earliest pass that left a
    /// failed window behind. Overlapping calls fail with
    /// [`MetricsError::AggregationInProgress`].
    pub async fn run_aggregation_pass(&self) -> MetricsResult<Vec<AggregationReport>> {
        self.ensure_running()?;
        let _guard = self
            .pass_lock
            .try_lock()
            .map_err(|_| MetricsError::AggregationInProgress)?;

        let now = self.clock.now_millis();
        let current_hour = hour_start(now);
        let hour = Duration::hours(1).num_milliseconds();
        let mut reports = Vec::new();

        let first_root = self
            .lock_replay()?
            .map_or(current_hour, |root| root.min(current_hour));

        let mut root = first_root;
        while root <= current_hour {
            reports.push(self.aggregator.run(root, now).await);
            root += hour;
        }
        if reports.len() > 1 {
            tracing::info!(
                from = first_root,
                passes = reports.len() - 1,
                "Replayed missed aggregation hours"
            );
        }

        let failures: usize = reports.iter().map(|r| r.failures().count()).sum();
        let retry_root = reports
            .iter()
            .find(|r| !r.is_success())
            .map(|r| r.root_hour);
        if failures > 0 {
            tracing::warn!(failures, ?retry_root, "Aggregation finished with failed windows");
        }
        *self.lock_replay()? = Some(retry_root.unwrap_or(current_hour + hour));

        Ok(reports)
    }

    /// Stop accepting work, wait for in-flight ingestion and close the store
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> MetricsResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("Shutting down metrics server");
        // Holding every permit means no insert is still running
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        let drained = self.permits.acquire_many(all).await;
        self.permits.close();
        drop(drained);

        let _pass = self.pass_lock.lock().await;
        self.store.close().await?;
        tracing::info!("Metrics server stopped");
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Permits currently free in the ingest pool
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Configured size of the ingest pool
    pub fn permit_capacity(&self) -> usize {
        self.capacity
    }

    /// Current time according to the server's clock
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn policy(&self) -> &TimeSlicePolicy {
        &self.policy
    }

    /// Whether the next pass will replay hours before the current one
    pub fn catch_up_pending(&self) -> bool {
        let current_hour = self.current_hour();
        self.replay_from
            .lock()
            .map(|root| root.is_some_and(|root| root < current_hour))
            .unwrap_or(false)
    }

    fn current_hour(&self) -> i64 {
        hour_start(self.clock.now_millis())
    }

    fn ensure_running(&self) -> MetricsResult<()> {
        if self.is_shut_down() {
            Err(MetricsError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn lock_replay(&self) -> MetricsResult<std::sync::MutexGuard<'_, Option<i64>>> {
        self.replay_from.lock().map_err(|e| {
            MetricsError::Storage(crate::storage::StorageError::Lock(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rollup::TransitionStatus;
    use crate::storage::testing::FlakyStore;
    use crate::storage::{IndexEntry, MemoryStore, Sample};

    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const BASE: i64 = 19_000 * DAY;

    fn server_at(store: Arc<MemoryStore>, now: i64) -> (MetricsServer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let server = MetricsServer::new(store, clock.clone(), ServerOptions::default());
        (server, clock)
    }

    async fn seed(store: &MemoryStore, series_id: u32, timestamp: i64, value: f64) {
        store
            .insert_raw(&Sample::new(series_id, timestamp, value))
            .await
            .unwrap();
        store
            .upsert_index(&[IndexEntry::new(Tier::Raw, hour_start(timestamp), series_id)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_restart_catch_up() {
        let store = Arc::new(MemoryStore::new());
        // Last data at 05:xx, then the process was down until 09:10
        seed(&store, 1, BASE + 5 * HOUR + 10 * MINUTE, 4.0).await;
        seed(&store, 1, BASE + 5 * HOUR + 40 * MINUTE, 8.0).await;

        let (server, _clock) = server_at(store.clone(), BASE + 9 * HOUR + 10 * MINUTE);
        server.init(false, BASE).await.unwrap();
        assert!(server.catch_up_pending());

        let reports = server.run_aggregation_pass().await.unwrap();
        // Catch-up roots 06:00 through 08:00, then the 09:00 pass
        let roots: Vec<i64> = reports.iter().map(|r| r.root_hour).collect();
        assert_eq!(
            roots,
            vec![BASE + 6 * HOUR, BASE + 7 * HOUR, BASE + 8 * HOUR, BASE + 9 * HOUR]
        );
        assert!(!server.catch_up_pending());

        let rows = store.all_aggregates(Tier::OneHour).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, BASE + 5 * HOUR);
        assert_eq!(rows[0].avg, 6.0);
        let computed: usize = reports.iter().map(|r| r.one_hour_aggregates.len()).sum();
        assert_eq!(computed, 1);

        // The 00:00 six hour window closed at 06:00, inside the replay
        let six = store.all_aggregates(Tier::SixHour).await;
        assert_eq!(six.len(), 1);
        assert_eq!(six[0].timestamp, BASE);
        assert_eq!((six[0].min, six[0].max, six[0].avg), (4.0, 8.0, 6.0));

        // A second trigger has nothing left to replay
        let again = server.run_aggregation_pass().await.unwrap();
        assert_eq!(again.len(), 1);
        assert!(again[0].one_hour_aggregates.is_empty());
    }

    #[tokio::test]
    async fn test_up_to_date_probe() {
        let store = Arc::new(MemoryStore::new());
        let (server, _clock) = server_at(store.clone(), BASE + 9 * HOUR + 10 * MINUTE);

        server.init(false, BASE).await.unwrap();
        assert!(!server.catch_up_pending());

        server.init(true, BASE).await.unwrap();
        assert!(!server.catch_up_pending());
    }

    #[tokio::test]
    async fn test_probe_stops_at_install_time() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, BASE + 2 * HOUR, 1.0).await;

        let (server, _clock) = server_at(store.clone(), BASE + 9 * HOUR);
        server.init(false, BASE + 5 * HOUR).await.unwrap();
        assert!(!server.catch_up_pending());
    }

    #[tokio::test]
    async fn test_pass_rolls_previous_hour() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, BASE + 10 * MINUTE, 10.0).await;
        seed(&store, 1, BASE + 30 * MINUTE, 20.0).await;
        seed(&store, 1, BASE + 50 * MINUTE, 30.0).await;

        let (server, clock) = server_at(store.clone(), BASE + 50 * MINUTE);
        let reports = server.run_aggregation_pass().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(store.all_aggregates(Tier::OneHour).await.is_empty());

        clock.advance(Duration::minutes(15));
        let reports = server.run_aggregation_pass().await.unwrap();
        assert_eq!(
            reports[0].transition(Tier::Raw).unwrap().status,
            TransitionStatus::Aggregated { series: 1 }
        );
        let rows = store.all_aggregates(Tier::OneHour).await;
        assert_eq!((rows[0].min, rows[0].max, rows[0].avg), (10.0, 30.0, 20.0));
    }

    #[tokio::test]
    async fn test_failed_window_is_retried_next_hour() {
        let store = Arc::new(FlakyStore::new());
        seed(&store.inner, 1, BASE + 10 * MINUTE, 3.0).await;
        store.fail_reads(1);

        let clock = Arc::new(ManualClock::new(BASE + HOUR + MINUTE));
        let server = MetricsServer::new(store.clone(), clock.clone(), ServerOptions::default());

        let first = server.run_aggregation_pass().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(matches!(
            first[0].transition(Tier::Raw).unwrap().status,
            TransitionStatus::Failed { .. }
        ));

        // Next tick lands in the following hour
        store.heal();
        clock.advance(Duration::hours(1));
        assert!(server.catch_up_pending());

        let second = server.run_aggregation_pass().await.unwrap();
        let roots: Vec<i64> = second.iter().map(|r| r.root_hour).collect();
        assert_eq!(roots, vec![BASE + HOUR, BASE + 2 * HOUR]);
        assert_eq!(
            second[0].transition(Tier::Raw).unwrap().status,
            TransitionStatus::Aggregated { series: 1 }
        );
        assert!(second.iter().all(|r| r.is_success()));
        assert!(!server.catch_up_pending());

        let rows = store.inner.all_aggregates(Tier::OneHour).await;
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].timestamp, rows[0].avg), (BASE, 3.0));
        assert_eq!(
            store.inner.all_index_entries().await,
            vec![IndexEntry::new(Tier::OneHour, BASE, 1)]
        );
    }

    #[tokio::test]
    async fn test_persistent_failure_stays_queued() {
        let store = Arc::new(FlakyStore::new());
        seed(&store.inner, 1, BASE + 10 * MINUTE, 3.0).await;
        store.fail_reads(1);

        let clock = Arc::new(ManualClock::new(BASE + HOUR + MINUTE));
        let server = MetricsServer::new(store.clone(), clock.clone(), ServerOptions::default());
        server.run_aggregation_pass().await.unwrap();

        clock.advance(Duration::hours(1));
        let second = server.run_aggregation_pass().await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(!second[0].is_success());

        store.heal();
        clock.advance(Duration::hours(1));
        let third = server.run_aggregation_pass().await.unwrap();
        let roots: Vec<i64> = third.iter().map(|r| r.root_hour).collect();
        assert_eq!(roots, vec![BASE + HOUR, BASE + 2 * HOUR, BASE + 3 * HOUR]);
        assert_eq!(store.inner.all_aggregates(Tier::OneHour).await.len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_ticks_are_replayed() {
        let store = Arc::new(MemoryStore::new());
        let (server, clock) = server_at(store.clone(), BASE + HOUR + MINUTE);
        server.run_aggregation_pass().await.unwrap();

        seed(&store, 1, BASE + HOUR + 20 * MINUTE, 9.0).await;

        // Two hourly ticks never ran
        clock.set(BASE + 3 * HOUR + MINUTE);
        let reports = server.run_aggregation_pass().await.unwrap();
        let roots: Vec<i64> = reports.iter().map(|r| r.root_hour).collect();
        assert_eq!(roots, vec![BASE + 2 * HOUR, BASE + 3 * HOUR]);
        assert_eq!(
            reports[0].transition(Tier::Raw).unwrap().status,
            TransitionStatus::Aggregated { series: 1 }
        );

        let rows = store.all_aggregates(Tier::OneHour).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, BASE + HOUR);
    }

    #[tokio::test]
    async fn test_oversized_permit_pool_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let options = ServerOptions {
            ingest_permits: usize::MAX,
            ..Default::default()
        };
        let server = MetricsServer::new(store, Arc::new(ManualClock::new(BASE)), options);

        assert_eq!(server.permit_capacity(), MAX_INGEST_PERMITS);
        assert_eq!(server.available_permits(), MAX_INGEST_PERMITS);
        server.shutdown().await.unwrap();
        assert!(server.is_shut_down());
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let (server, _clock) = server_at(store, BASE + HOUR);

        let guard = server.pass_lock.lock().await;
        assert!(matches!(
            server.run_aggregation_pass().await,
            Err(MetricsError::AggregationInProgress)
        ));
        drop(guard);
        assert!(server.run_aggregation_pass().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_final() {
        let store = Arc::new(MemoryStore::new());
        let (server, _clock) = server_at(store, BASE + HOUR);

        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
        assert!(server.is_shut_down());

        assert!(matches!(
            server.run_aggregation_pass().await,
            Err(MetricsError::ShutDown)
        ));
        assert!(matches!(
            server.init(false, 0).await,
            Err(MetricsError::ShutDown)
        ));
    }
}
