//! Index-driven rollup pipeline
//!
//! One pass walks the chain RAW → 1h → 6h → 24h. For each transition T → T′
//! it picks the most recently completed T′ window before the pass root,
//! looks up which series have T data there via the index, folds each series
//! into a single T′ aggregate and then hands the window over to the next
//! transition by writing T′ index entries.
//!
//! ```text
//!   index[raw, hour]   ──► aggregates[1h]  + index[1h, 6h-window]
//!   index[1h, 6h-win]  ──► aggregates[6h]  + index[6h, 24h-window]
//!   index[6h, 24h-win] ──► aggregates[24h]
//! ```
//!
//! Index entries for a window are only deleted once every series in it was
//! written and the next-tier entries were persisted. Any failure leaves the
//! window's entries in place so the next pass redoes it; aggregate writes
//! overwrite, so redoing is harmless.

use crate::rollup::mean::Accumulator;
use crate::rollup::time_slice::window_start;
use crate::storage::{Aggregate, IndexEntry, MetricsStore, StorageResult, Tier, TimeRange};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one (transition, window) attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransitionStatus {
    /// Aggregates were written for `series` series and the window was consumed
    Aggregated { series: usize },
    /// No index entries for the window
    Empty,
    /// The window has not fully elapsed yet
    NotReady,
    /// A store call failed; the window's index entries were left in place
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionReport {
    pub from: Tier,
    pub to: Tier,
    pub window_start: i64,
    #[serde(flatten)]
    pub status: TransitionStatus,
}

/// Everything one pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationReport {
    /// Hour boundary the pass was rooted at
    pub root_hour: i64,
    pub transitions: Vec<TransitionReport>,
    /// One hour aggregates written by this pass
    pub one_hour_aggregates: Vec<Aggregate>,
}

impl AggregationReport {
    pub fn failures(&self) -> impl Iterator<Item = &TransitionReport> {
        self.transitions
            .iter()
            .filter(|t| matches!(t.status, TransitionStatus::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Report for the transition out of `from`, if it was attempted
    pub fn transition(&self, from: Tier) -> Option<&TransitionReport> {
        self.transitions.iter().find(|t| t.from == from)
    }
}

/// Runs rollup passes against a store
pub struct Aggregator {
    store: Arc<dyn MetricsStore>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    /// Run one pass rooted at the hour boundary `root_hour`
    ///
    /// Windows that end after `root_hour` or after `now` are reported as
    /// [`TransitionStatus::NotReady`] and left for a later pass.
    pub async fn run(&self, root_hour: i64, now: i64) -> AggregationReport {
        let last_hour = root_hour - Duration::hours(1).num_milliseconds();
        let mut report = AggregationReport {
            root_hour,
            ..Default::default()
        };

        let mut from = Tier::Raw;
        while let Some(to) = from.next() {
            let Some(width) = to.width() else { break };
            let window = window_start(last_hour, width);
            let window_end = window + width.num_milliseconds();

            let status = if window_end > root_hour || window_end > now {
                TransitionStatus::NotReady
            } else {
                match self.roll_window(from, to, window, width).await {
                    Ok(None) => TransitionStatus::Empty,
                    Ok(Some(written)) => {
                        let series = written.len();
                        if to == Tier::OneHour {
                            report.one_hour_aggregates.extend(written);
                        }
                        TransitionStatus::Aggregated { series }
                    }
                    Err(e) => {
                        warn!(
                            from = %from,
                            to = %to,
                            window_start = window,
                            error = %e,
                            "Rollup failed, index entries kept for retry"
                        );
                        TransitionStatus::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            };

            report.transitions.push(TransitionReport {
                from,
                to,
                window_start: window,
                status,
            });
            from = to;
        }

        let aggregated = report
            .transitions
            .iter()
            .filter(|t| matches!(t.status, TransitionStatus::Aggregated { .. }))
            .count();
        if aggregated > 0 {
            info!(
                root_hour,
                transitions = aggregated,
                one_hour = report.one_hour_aggregates.len(),
                "Aggregation pass complete"
            );
        } else {
            debug!(root_hour, "Aggregation pass found nothing to roll up");
        }

        report
    }

    /// Roll one `from` window into `to`
    ///
    /// Returns `None` when the window has no index entries, otherwise the
    /// aggregates written. Series without points in the window are skipped.
    async fn roll_window(
        &self,
        from: Tier,
        to: Tier,
        window: i64,
        width: Duration,
    ) -> StorageResult<Option<Vec<Aggregate>>> {
        let entries = self.store.find_index_entries(from, window).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let mut series_ids: Vec<u32> = entries.iter().map(|e| e.series_id).collect();
        series_ids.sort_unstable();
        series_ids.dedup();

        let range = TimeRange::window(window, width);
        let next_index_width = to.index_width();
        let mut written = Vec::with_capacity(series_ids.len());
        let mut next_entries = Vec::new();

        for series_id in series_ids {
            let acc = self.fold_series(from, series_id, range).await?;
            if acc.is_empty() {
                debug!(series_id, from = %from, window_start = window, "No points in indexed window");
                continue;
            }

            let aggregate = Aggregate::new(series_id, to, window, acc.min(), acc.max(), acc.avg());
            self.store.insert_aggregate(&aggregate).await?;
            written.push(aggregate);

            if let Some(next_width) = next_index_width {
                next_entries.push(IndexEntry::new(
                    to,
                    window_start(window, next_width),
                    series_id,
                ));
            }
        }

        if !next_entries.is_empty() {
            self.store.upsert_index(&next_entries).await?;
        }
        self.store.delete_index_entries(from, window).await?;

        debug!(
            from = %from,
            to = %to,
            window_start = window,
            series = written.len(),
            "Window rolled up"
        );
        Ok(Some(written))
    }

    async fn fold_series(
        &self,
        from: Tier,
        series_id: u32,
        range: TimeRange,
    ) -> StorageResult<Accumulator> {
        let mut acc = Accumulator::new();
        if from == Tier::Raw {
            for sample in self.store.find_raw(&[series_id], range).await? {
                acc.add_value(sample.value);
            }
        } else {
            for agg in self.store.find_aggregates(from, &[series_id], range).await? {
                acc.add_aggregate(agg.avg, agg.min, agg.max);
            }
        }
        Ok(acc)
    }
}
