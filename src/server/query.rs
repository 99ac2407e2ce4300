//! Read path
//!
//! The tier is chosen from the age of `begin` alone. Raw samples are folded
//! value by value; aggregates are folded as min of mins, max of maxes and the
//! mean of their averages.

use crate::rollup::{Accumulator, Bucket, Buckets};
use crate::server::error::{MetricsError, MetricsResult};
use crate::server::MetricsServer;
use crate::storage::{Sample, Tier, TimeRange};
use serde::{Deserialize, Serialize};

/// Single min/max/avg over a span
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Begin of the queried span
    pub timestamp: i64,
    /// Tier the points were read from
    pub tier: Tier,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// Points folded; zero means min, max and avg are NaN
    pub count: u64,
}

impl MetricsServer {
    /// Summary of one series over `[begin, end)`
    pub async fn summary_aggregate(
        &self,
        series_id: u32,
        begin: i64,
        end: i64,
    ) -> MetricsResult<Summary> {
        self.group_summary_aggregate(&[series_id], begin, end).await
    }

    /// Summary of several series folded together over `[begin, end)`
    pub async fn group_summary_aggregate(
        &self,
        series_ids: &[u32],
        begin: i64,
        end: i64,
    ) -> MetricsResult<Summary> {
        let started = std::time::Instant::now();
        let (tier, range) = self.route(begin, end)?;

        let mut acc = Accumulator::new();
        self.for_each_point(tier, series_ids, range, |_, avg, min, max| {
            acc.add_aggregate(avg, min, max);
            Ok(())
        })
        .await?;

        tracing::debug!(
            series = series_ids.len(),
            tier = %tier,
            points = acc.count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Calculated summary aggregate"
        );

        Ok(Summary {
            timestamp: begin,
            tier,
            min: acc.min(),
            max: acc.max(),
            avg: acc.avg(),
            count: acc.count(),
        })
    }

    /// One series downsampled into `buckets` equal slots over `[begin, end)`
    pub async fn find_data(
        &self,
        series_id: u32,
        begin: i64,
        end: i64,
        buckets: usize,
    ) -> MetricsResult<Vec<Bucket>> {
        self.find_group_data(&[series_id], begin, end, buckets).await
    }

    /// Several series downsampled together into `buckets` slots over `[begin, end)`
    pub async fn find_group_data(
        &self,
        series_ids: &[u32],
        begin: i64,
        end: i64,
        buckets: usize,
    ) -> MetricsResult<Vec<Bucket>> {
        let (tier, range) = self.route(begin, end)?;
        let mut slots = Buckets::new(begin, end, buckets)?;

        self.for_each_point(tier, series_ids, range, |timestamp, avg, min, max| {
            slots.insert(timestamp, avg, min, max)
        })
        .await?;

        Ok(slots.into_vec())
    }

    /// Most recent raw sample of a series
    pub async fn find_latest_value(&self, series_id: u32) -> MetricsResult<Option<Sample>> {
        self.ensure_running()?;
        Ok(self.store.find_latest_raw(series_id).await?)
    }

    fn route(&self, begin: i64, end: i64) -> MetricsResult<(Tier, TimeRange)> {
        self.ensure_running()?;
        let range = TimeRange::try_new(begin, end).ok_or_else(|| {
            MetricsError::InvalidArgument(format!("begin ({}) must be before end ({})", begin, end))
        })?;
        let tier = self
            .policy
            .tier_for(begin, self.clock.now_millis())
            .ok_or(MetricsError::OutOfRange { begin })?;
        Ok((tier, range))
    }

    /// Feed every point of `tier` in `range` to `f` as (timestamp, avg, min, max)
    async fn for_each_point<F>(
        &self,
        tier: Tier,
        series_ids: &[u32],
        range: TimeRange,
        mut f: F,
    ) -> MetricsResult<()>
    where
        F: FnMut(i64, f64, f64, f64) -> MetricsResult<()>,
    {
        match tier {
            Tier::Raw => {
                for sample in self.store.find_raw(series_ids, range).await? {
                    f(sample.timestamp, sample.value, sample.value, sample.value)?;
                }
            }
            Tier::OneHour | Tier::SixHour | Tier::TwentyFourHour => {
                for agg in self.store.find_aggregates(tier, series_ids, range).await? {
                    f(agg.timestamp, agg.avg, agg.min, agg.max)?;
                }
            }
        }
        Ok(())
    }
}
