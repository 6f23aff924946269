//! Core types and traits of the payload layer.
//!
//! - [`PayloadStore`] / [`PayloadScan`]: the pluggable backend contract
//! - [`ScanCursor`] / [`ScanRange`]: positions over a store's keyspace
//! - [`ResourceRecord`] / [`SystemOfRecord`]: what reconciliation compares
//! - [`PayloadInterceptor`]: request-lifecycle notification points

mod cursor;
pub mod hooks;
mod record;
mod store;

pub use cursor::{ScanCursor, ScanRange};
pub use hooks::{
    NoopInterceptor, PayloadHookContext, PayloadInterceptor, PayloadOperation, intercept,
};
pub use record::{MetadataRow, ResourceRecord, SystemOfRecord};
pub use store::{
    BlockingPayloadStore, DeleteOutcome, PayloadBackendKind, PayloadScan, PayloadStore, Ready,
    ScannablePayloadStore, SharedPayloadStore, StoreAck, SyncPayloadStore,
};
