//! Downsampler
//!
//! Tiles `[begin, end)` into a fixed number of equal-width buckets and folds
//! points into them. Each point is an (avg, min, max) triple, so raw samples
//! and tier aggregates go through the same path.

use crate::rollup::mean::Accumulator;
use crate::server::error::{MetricsError, MetricsResult};
use serde::{Deserialize, Serialize};

/// One downsampled slot
///
/// Empty buckets carry NaN for all three statistics, which serializes as
/// `null` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// First millisecond covered by the bucket
    pub start_time: i64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl Bucket {
    pub fn is_empty(&self) -> bool {
        self.avg.is_nan()
    }
}

/// Fixed set of buckets tiling a query span
#[derive(Debug, Clone)]
pub struct Buckets {
    begin: i64,
    end: i64,
    width: i64,
    slots: Vec<Accumulator>,
}

impl Buckets {
    /// Allocate `count` empty buckets over `[begin, end)`
    ///
    /// Fails when the span is empty, `count` is zero, or the span is too
    /// short to give every bucket at least one millisecond. The last bucket
    /// absorbs the division remainder.
    pub fn new(begin: i64, end: i64, count: usize) -> MetricsResult<Self> {
        if begin >= end {
            return Err(MetricsError::InvalidArgument(format!(
                "begin ({}) must be before end ({})",
                begin, end
            )));
        }
        if count == 0 {
            return Err(MetricsError::InvalidArgument(
                "number of buckets must be positive".to_string(),
            ));
        }

        let span = end - begin;
        let width = span / count as i64;
        if width == 0 {
            return Err(MetricsError::InvalidArgument(format!(
                "range of {}ms is too short for {} buckets",
                span, count
            )));
        }

        Ok(Self {
            begin,
            end,
            width,
            slots: vec![Accumulator::new(); count],
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Width of every bucket but possibly the last
    pub fn width(&self) -> i64 {
        self.width
    }

    /// Index of the bucket covering `timestamp`, if it is in range
    pub fn index_of(&self, timestamp: i64) -> Option<usize> {
        if timestamp < self.begin || timestamp >= self.end {
            return None;
        }
        let index = ((timestamp - self.begin) / self.width) as usize;
        Some(index.min(self.slots.len() - 1))
    }

    /// Fold one point into the bucket covering `timestamp`
    pub fn insert(&mut self, timestamp: i64, avg: f64, min: f64, max: f64) -> MetricsResult<()> {
        let index = self.index_of(timestamp).ok_or_else(|| {
            MetricsError::InvalidArgument(format!(
                "timestamp {} outside [{}, {})",
                timestamp, self.begin, self.end
            ))
        })?;
        self.slots[index].add_aggregate(avg, min, max);
        Ok(())
    }

    /// Bucket at `index`
    pub fn get(&self, index: usize) -> Option<Bucket> {
        self.slots.get(index).map(|acc| self.bucket(index, acc))
    }

    /// All buckets in time order, empty ones included
    pub fn iter(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, acc)| self.bucket(index, acc))
    }

    pub fn into_vec(self) -> Vec<Bucket> {
        self.iter().collect()
    }

    fn bucket(&self, index: usize, acc: &Accumulator) -> Bucket {
        Bucket {
            start_time: self.begin + index as i64 * self.width,
            avg: acc.avg(),
            min: acc.min(),
            max: acc.max(),
        }
    }
}
