//! Surge pricing: sliding-window recency-weighted multiplier per geo-cell.
//!
//! Each supply/demand snapshot lands in a per-cell sorted-set window; the
//! multiplier is recomputed from the surviving entries with newer snapshots
//! weighted more, clamped to `[1.0, 3.0]`, cached for the snapshot cadence,
//! and mirrored to a Postgres audit row. Reads go cache → audit → 1.0, with
//! the `surge_pricing_enabled` flag short-circuiting everything to 1.0.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod calculator;
pub mod consumer;
pub mod memory;
pub mod postgres;
pub mod store;

pub use calculator::{SurgeError, SurgeService};
pub use store::{GeoCellRecord, SurgeCellStore, SurgeCellStoreError};
