//! SQLite metrics store
//!
//! Durable [`MetricsStore`] backed by a single SQLite database. Primary keys
//! give the overwrite semantics the rollup pipeline relies on:
//!
//! ```text
//! raw_metrics      (series_id, timestamp)          INSERT OR REPLACE
//! aggregates       (tier, series_id, timestamp)    INSERT OR REPLACE
//! metrics_index    (tier, window_start, series_id) INSERT OR IGNORE
//! ```
//!
//! The connection lives behind a `std::sync::Mutex` because `rusqlite::Connection`
//! is not `Sync`. Statements are short, so the lock is never held across an await.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::MetricsStore;
use crate::storage::types::{Aggregate, IndexEntry, Sample, Tier, TimeRange};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS raw_metrics (
        series_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        value REAL NOT NULL,
        PRIMARY KEY (series_id, timestamp)
    );

    CREATE TABLE IF NOT EXISTS aggregates (
        tier INTEGER NOT NULL,
        series_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        min REAL NOT NULL,
        max REAL NOT NULL,
        avg REAL NOT NULL,
        PRIMARY KEY (tier, series_id, timestamp)
    );

    CREATE TABLE IF NOT EXISTS metrics_index (
        tier INTEGER NOT NULL,
        window_start INTEGER NOT NULL,
        series_id INTEGER NOT NULL,
        PRIMARY KEY (tier, window_start, series_id)
    );
";

/// SQLite-backed metrics store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open the store in `data_dir/metrics.db`
    pub fn open(data_dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("metrics.db");

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Configure for performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(path = %path.display(), "Opened SQLite metrics store");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file, if this store is file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire connection lock: {}", e)))
    }
}

fn tier_from_row(code: i64) -> rusqlite::Result<Tier> {
    Tier::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("unknown tier code {}", code).into(),
        )
    })
}

#[async_trait]
impl MetricsStore for SqliteStore {
    async fn insert_raw(&self, sample: &Sample) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.prepare_cached(
            "INSERT OR REPLACE INTO raw_metrics (series_id, timestamp, value) VALUES (?, ?, ?)",
        )?
        .execute(params![sample.series_id, sample.timestamp, sample.value])?;
        Ok(())
    }

    async fn insert_aggregate(&self, aggregate: &Aggregate) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.prepare_cached(
            "INSERT OR REPLACE INTO aggregates (tier, series_id, timestamp, min, max, avg)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?
        .execute(params![
            aggregate.tier.code(),
            aggregate.series_id,
            aggregate.timestamp,
            aggregate.min,
            aggregate.max,
            aggregate.avg
        ])?;
        Ok(())
    }

    async fn find_raw(&self, series_ids: &[u32], range: TimeRange) -> StorageResult<Vec<Sample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, value FROM raw_metrics
             WHERE series_id = ? AND timestamp >= ? AND timestamp < ?
             ORDER BY timestamp",
        )?;

        let mut samples = Vec::new();
        for &series_id in series_ids {
            let rows = stmt.query_map(params![series_id, range.start, range.end], |row| {
                Ok(Sample::new(series_id, row.get(0)?, row.get(1)?))
            })?;
            for row in rows {
                samples.push(row?);
            }
        }

        samples.sort_by_key(|s| (s.timestamp, s.series_id));
        Ok(samples)
    }

    async fn find_aggregates(
        &self,
        tier: Tier,
        series_ids: &[u32],
        range: TimeRange,
    ) -> StorageResult<Vec<Aggregate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, min, max, avg FROM aggregates
             WHERE tier = ? AND series_id = ? AND timestamp >= ? AND timestamp < ?
             ORDER BY timestamp",
        )?;

        let mut aggregates = Vec::new();
        for &series_id in series_ids {
            let rows = stmt.query_map(
                params![tier.code(), series_id, range.start, range.end],
                |row| {
                    Ok(Aggregate::new(
                        series_id,
                        tier,
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )?;
            for row in rows {
                aggregates.push(row?);
            }
        }

        aggregates.sort_by_key(|a| (a.timestamp, a.series_id));
        Ok(aggregates)
    }

    async fn find_latest_raw(&self, series_id: u32) -> StorageResult<Option<Sample>> {
        let conn = self.conn()?;
        let sample = conn
            .prepare_cached(
                "SELECT timestamp, value FROM raw_metrics
                 WHERE series_id = ?
                 ORDER BY timestamp DESC
                 LIMIT 1",
            )?
            .query_row(params![series_id], |row| {
                Ok(Sample::new(series_id, row.get(0)?, row.get(1)?))
            })
            .optional()?;
        Ok(sample)
    }

    async fn upsert_index(&self, entries: &[IndexEntry]) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO metrics_index (tier, window_start, series_id)
                 VALUES (?, ?, ?)",
            )?;
            for entry in entries {
                stmt.execute(params![entry.tier.code(), entry.window_start, entry.series_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn find_index_entries(
        &self,
        tier: Tier,
        window_start: i64,
    ) -> StorageResult<Vec<IndexEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT tier, window_start, series_id FROM metrics_index
             WHERE tier = ? AND window_start = ?
             ORDER BY series_id",
        )?;

        let rows = stmt.query_map(params![tier.code(), window_start], |row| {
            Ok(IndexEntry::new(
                tier_from_row(row.get(0)?)?,
                row.get(1)?,
                row.get(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    async fn delete_index_entries(&self, tier: Tier, window_start: i64) -> StorageResult<()> {
        let conn = self.conn()?;
        let deleted = conn
            .prepare_cached("DELETE FROM metrics_index WHERE tier = ? AND window_start = ?")?
            .execute(params![tier.code(), window_start])?;
        tracing::debug!(%tier, window_start, deleted, "Deleted index entries");
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        if self.path.is_some() {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        }
        Ok(())
    }
}
