//! API Routes
//!
//! Route handlers organized by functionality.

pub mod aggregation;
pub mod health;
pub mod ingest;
pub mod query;
