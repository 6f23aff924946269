//! Orphaned payload detection and removal.
//!
//! A payload write and the metadata transaction that references it are not
//! atomic. [`ReconciliationEngine`] walks a payload store with the
//! [`TokenRangeScanner`](crate::scanner::TokenRangeScanner), asks the
//! [`SystemOfRecord`](crate::core::SystemOfRecord) about every record, and
//! deletes the payloads nothing references.

mod engine;
mod stats;

pub use engine::ReconciliationEngine;
pub use stats::ReconcileStats;
