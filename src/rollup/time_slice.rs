//! Time-Slice Policy
//!
//! Two jobs:
//! - Flooring instants onto the epoch-aligned window grid of a given width
//! - Routing a query's begin time to the tier that should serve it, based on age
//!
//! # Tier ranges
//!
//! ```text
//!  older ◄──────────────────────────────────────────────────── now
//!  │ none │   24h    │     6h     │     1h     │      raw      │
//!         ▲          ▲            ▲            ▲
//!      24h ret.   6h ret.      1h ret.      raw ret.
//! ```
//!
//! Each range is closed at its older end and open at its newer end, so every
//! instant inside the retention horizon belongs to exactly one range.

use crate::storage::Tier;
use chrono::Duration;

/// Floor `timestamp` to the start of its `width`-wide window
///
/// Windows sit on a fixed grid anchored at the Unix epoch, so calls are
/// idempotent and never drift. Negative timestamps floor toward -∞.
pub fn window_start(timestamp: i64, width: Duration) -> i64 {
    let width = width.num_milliseconds();
    debug_assert!(width > 0, "window width must be positive");
    timestamp - timestamp.rem_euclid(width)
}

/// Start of the hour containing `timestamp`
pub fn hour_start(timestamp: i64) -> i64 {
    window_start(timestamp, Duration::hours(1))
}

/// How long data stays queryable at each tier, measured back from now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlicePolicy {
    raw: Duration,
    one_hour: Duration,
    six_hour: Duration,
    twenty_four_hour: Duration,
}

impl Default for TimeSlicePolicy {
    fn default() -> Self {
        Self {
            raw: Duration::days(7),
            one_hour: Duration::days(14),
            six_hour: Duration::days(31),
            twenty_four_hour: Duration::days(365),
        }
    }
}

impl TimeSlicePolicy {
    /// Build a policy; retentions must be positive and strictly increasing
    pub fn new(
        raw: Duration,
        one_hour: Duration,
        six_hour: Duration,
        twenty_four_hour: Duration,
    ) -> Result<Self, String> {
        if raw <= Duration::zero() {
            return Err("raw retention must be positive".to_string());
        }
        if !(raw < one_hour && one_hour < six_hour && six_hour < twenty_four_hour) {
            return Err(format!(
                "retentions must be strictly increasing: raw={}h one_hour={}h six_hour={}h twenty_four_hour={}h",
                raw.num_hours(),
                one_hour.num_hours(),
                six_hour.num_hours(),
                twenty_four_hour.num_hours()
            ));
        }

        Ok(Self {
            raw,
            one_hour,
            six_hour,
            twenty_four_hour,
        })
    }

    /// Retention of a tier
    pub fn retention(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Raw => self.raw,
            Tier::OneHour => self.one_hour,
            Tier::SixHour => self.six_hour,
            Tier::TwentyFourHour => self.twenty_four_hour,
        }
    }

    pub fn is_in_raw_range(&self, timestamp: i64, now: i64) -> bool {
        age(timestamp, now) < self.raw
    }

    pub fn is_in_one_hour_range(&self, timestamp: i64, now: i64) -> bool {
        let age = age(timestamp, now);
        self.raw <= age && age < self.one_hour
    }

    pub fn is_in_six_hour_range(&self, timestamp: i64, now: i64) -> bool {
        let age = age(timestamp, now);
        self.one_hour <= age && age < self.six_hour
    }

    pub fn is_in_twenty_four_hour_range(&self, timestamp: i64, now: i64) -> bool {
        let age = age(timestamp, now);
        self.six_hour <= age && age < self.twenty_four_hour
    }

    /// The tier whose range contains `timestamp`, or `None` past the horizon
    pub fn tier_for(&self, timestamp: i64, now: i64) -> Option<Tier> {
        if self.is_in_raw_range(timestamp, now) {
            Some(Tier::Raw)
        } else if self.is_in_one_hour_range(timestamp, now) {
            Some(Tier::OneHour)
        } else if self.is_in_six_hour_range(timestamp, now) {
            Some(Tier::SixHour)
        } else if self.is_in_twenty_four_hour_range(timestamp, now) {
            Some(Tier::TwentyFourHour)
        } else {
            None
        }
    }
}

fn age(timestamp: i64, now: i64) -> Duration {
    Duration::milliseconds(now.saturating_sub(timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 24 * HOUR;

    #[test]
    fn test_window_start_alignment() {
        assert_eq!(window_start(0, Duration::hours(1)), 0);
        assert_eq!(window_start(HOUR - 1, Duration::hours(1)), 0);
        assert_eq!(window_start(HOUR, Duration::hours(1)), HOUR);
        assert_eq!(window_start(7 * HOUR + 5, Duration::hours(6)), 6 * HOUR);
        assert_eq!(window_start(30 * HOUR, Duration::hours(24)), DAY);
    }

    #[test]
    fn test_window_start_is_idempotent() {
        for ts in [0, 1, 59_999, 1_700_000_123_456, -1, -HOUR - 1] {
            for width in [Duration::hours(1), Duration::hours(6), Duration::hours(24)] {
                let once = window_start(ts, width);
                assert_eq!(window_start(once, width), once);
                assert!(once <= ts);
                assert!(ts - once < width.num_milliseconds());
            }
        }
    }

    #[test]
    fn test_window_start_negative() {
        assert_eq!(window_start(-1, Duration::hours(1)), -HOUR);
        assert_eq!(hour_start(-HOUR), -HOUR);
    }

    #[test]
    fn test_tier_routing() {
        let policy = TimeSlicePolicy::default();
        let now = 400 * DAY;

        assert_eq!(policy.tier_for(now, now), Some(Tier::Raw));
        assert_eq!(policy.tier_for(now + HOUR, now), Some(Tier::Raw));
        assert_eq!(policy.tier_for(now - 7 * DAY + 1, now), Some(Tier::Raw));
        assert_eq!(policy.tier_for(now - 7 * DAY, now), Some(Tier::OneHour));
        assert_eq!(policy.tier_for(now - 14 * DAY, now), Some(Tier::SixHour));
        assert_eq!(policy.tier_for(now - 31 * DAY, now), Some(Tier::TwentyFourHour));
        assert_eq!(policy.tier_for(now - 365 * DAY + 1, now), Some(Tier::TwentyFourHour));
        assert_eq!(policy.tier_for(now - 365 * DAY, now), None);
    }

    #[test]
    fn test_exactly_one_range_holds() {
        let policy = TimeSlicePolicy::default();
        let now = 1_700_000_000_000;
        let horizon = policy.retention(Tier::TwentyFourHour).num_milliseconds();

        // Walk the whole horizon in steps that hit every boundary and its neighbours
        let mut ts = now + DAY;
        while ts > now - horizon {
            let hits = [
                policy.is_in_raw_range(ts, now),
                policy.is_in_one_hour_range(ts, now),
                policy.is_in_six_hour_range(ts, now),
                policy.is_in_twenty_four_hour_range(ts, now),
            ]
            .iter()
            .filter(|hit| **hit)
            .count();
            assert_eq!(hits, 1, "timestamp {} matched {} ranges", ts, hits);
            ts -= HOUR / 2 + 7;
        }

        for boundary in [7, 14, 31] {
            let edge = now - boundary * DAY;
            for ts in [edge - 1, edge, edge + 1] {
                assert!(policy.tier_for(ts, now).is_some());
            }
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(TimeSlicePolicy::new(
            Duration::days(1),
            Duration::days(2),
            Duration::days(3),
            Duration::days(4)
        )
        .is_ok());

        assert!(TimeSlicePolicy::new(
            Duration::days(7),
            Duration::days(7),
            Duration::days(31),
            Duration::days(365)
        )
        .is_err());

        assert!(TimeSlicePolicy::new(
            Duration::zero(),
            Duration::days(1),
            Duration::days(2),
            Duration::days(3)
        )
        .is_err());
    }
}
