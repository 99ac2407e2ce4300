//! Core data types for the Strata storage layer
//!
//! This module defines the fundamental types shared by ingestion, rollup and queries:
//! - `Sample`: A single raw measurement
//! - `Tier`: The resolution a point is stored at
//! - `Aggregate`: A min/max/avg rollup of one window at one tier
//! - `IndexEntry`: Marker for data that still needs rolling up
//! - `TimeRange`: A half-open time interval for queries

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// A single raw sample
///
/// Immutable once written. Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Series (metric schedule) this sample belongs to
    pub series_id: u32,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// The measured value
    pub value: f64,
}

impl Sample {
    pub fn new(series_id: u32, timestamp: i64, value: f64) -> Self {
        Self {
            series_id,
            timestamp,
            value,
        }
    }
}

/// Storage resolution
///
/// Tiers form a strict total order: `Raw < OneHour < SixHour < TwentyFourHour`.
/// Each non-raw tier is computed from the tier directly below it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Samples as ingested
    Raw,
    /// One hour aggregates
    OneHour,
    /// Six hour aggregates
    SixHour,
    /// Twenty four hour aggregates
    TwentyFourHour,
}

impl Tier {
    /// All tiers, finest first
    pub fn all() -> &'static [Tier] {
        &[
            Tier::Raw,
            Tier::OneHour,
            Tier::SixHour,
            Tier::TwentyFourHour,
        ]
    }

    /// The tier this one rolls up into
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Raw => Some(Tier::OneHour),
            Tier::OneHour => Some(Tier::SixHour),
            Tier::SixHour => Some(Tier::TwentyFourHour),
            Tier::TwentyFourHour => None,
        }
    }

    /// Width of one aggregate window at this tier (`None` for raw)
    pub fn width(self) -> Option<Duration> {
        match self {
            Tier::Raw => None,
            Tier::OneHour => Some(Duration::hours(1)),
            Tier::SixHour => Some(Duration::hours(6)),
            Tier::TwentyFourHour => Some(Duration::hours(24)),
        }
    }

    /// Width of the windows this tier's index entries are keyed by
    ///
    /// Index entries for a tier are aligned to the window of the tier it rolls
    /// up into, so raw entries are hourly and one hour entries are six-hourly.
    pub fn index_width(self) -> Option<Duration> {
        self.next().and_then(Tier::width)
    }

    /// Stable numeric code used by the SQLite store
    pub fn code(self) -> i64 {
        match self {
            Tier::Raw => 0,
            Tier::OneHour => 1,
            Tier::SixHour => 2,
            Tier::TwentyFourHour => 3,
        }
    }

    /// Inverse of [`Tier::code`]
    pub fn from_code(code: i64) -> Option<Tier> {
        match code {
            0 => Some(Tier::Raw),
            1 => Some(Tier::OneHour),
            2 => Some(Tier::SixHour),
            3 => Some(Tier::TwentyFourHour),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Raw => write!(f, "raw"),
            Tier::OneHour => write!(f, "one_hour"),
            Tier::SixHour => write!(f, "six_hour"),
            Tier::TwentyFourHour => write!(f, "twenty_four_hour"),
        }
    }
}

/// A rolled-up window of one series at one tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Aggregate {
    pub series_id: u32,
    pub tier: Tier,
    /// Window start, in milliseconds
    pub timestamp: i64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl Aggregate {
    pub fn new(series_id: u32, tier: Tier, timestamp: i64, min: f64, max: f64, avg: f64) -> Self {
        Self {
            series_id,
            tier,
            timestamp,
            min,
            max,
            avg,
        }
    }
}

/// Marker that `series_id` has `tier` data in the window starting at
/// `window_start` which has not been rolled into the next tier yet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexEntry {
    pub tier: Tier,
    pub window_start: i64,
    pub series_id: u32,
}

impl IndexEntry {
    pub fn new(tier: Tier, window_start: i64, series_id: u32) -> Self {
        Self {
            tier,
            window_start,
            series_id,
        }
    }
}

/// Time range for queries (half-open interval: [start, end))
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive), in milliseconds
    pub start: i64,
    /// End timestamp (exclusive), in milliseconds
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range
    ///
    /// # Panics
    /// Panics if start >= end
    pub fn new(start: i64, end: i64) -> Self {
        assert!(start < end, "TimeRange: start must be less than end");
        Self { start, end }
    }

    /// Create a time range, returning None if invalid
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Range covering `width` starting at `start`
    pub fn window(start: i64, width: Duration) -> Self {
        Self {
            start,
            end: start + width.num_milliseconds(),
        }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Get the duration in milliseconds
    pub fn duration_millis(&self) -> i64 {
        self.end - self.start
    }
}
