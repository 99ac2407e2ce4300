//! Rollup engine
//!
//! - **time_slice**: Window alignment and tier routing by age
//! - **mean**: Incremental mean and min/max accumulation
//! - **buckets**: Fixed-count downsampling of a query span
//! - **pipeline**: Index-driven RAW → 1h → 6h → 24h aggregation passes

pub mod buckets;
pub mod mean;
pub mod pipeline;
pub mod time_slice;

pub use buckets::{Bucket, Buckets};
pub use mean::{Accumulator, ArithmeticMean};
pub use pipeline::{AggregationReport, Aggregator, TransitionReport, TransitionStatus};
pub use time_slice::{hour_start, window_start, TimeSlicePolicy};
