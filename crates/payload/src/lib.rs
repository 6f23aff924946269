//! Helios FHIR Server Payload Layer
//!
//! Resource metadata lives in the relational system of record; the
//! serialized resource (the payload) can be offloaded to a blob-oriented
//! store. This crate holds that payload side: addressing, the pluggable
//! store contract, and the sweep that removes payloads no metadata row
//! references.
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite system-of-record adapter
//! - `s3` - AWS S3 (or compatible) payload store via aws-sdk-s3
//! - `cassandra` - Apache Cassandra payload store via cdrs-tokio
//!
//! The in-memory store and system of record are always available.
//!
//! # Architecture
//!
//! - [`address`] - payload addresses and their storage path
//! - [`core`] - store traits, scan cursors, records, interceptor hooks
//! - [`backends`] - memory, S3 and Cassandra stores; system-of-record adapters
//! - [`codec`] - optional zstd compression of stored bytes
//! - [`scanner`] - bounded, resumable pages over a store
//! - [`checkpoint`] - safe resume point over out-of-order completions
//! - [`reconcile`] - orphan detection and removal
//! - [`journal`] - payload writes of one metadata transaction
//! - [`registry`] - backend factory and per-datastore store cache
//! - [`config`] - settings objects
//! - [`error`] - error taxonomy
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use helios_payload::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> PayloadResult<()> {
//! let store = Arc::new(Ready::new(MemoryPayloadStore::new()));
//! let sor = Arc::new(MemorySystemOfRecord::new());
//!
//! // Version 1 is committed, version 2's metadata transaction rolled back.
//! store.store(&PayloadAddress::new(1, "p1", 1, "k1")?, b"{}").await?;
//! store.store(&PayloadAddress::new(1, "p1", 2, "k2")?, b"{}").await?;
//! sor.insert(1, "p1", 1, "k1");
//!
//! let engine = ReconciliationEngine::new(
//!     DatastoreKey::new("acme", "default"),
//!     store.clone(),
//!     sor,
//!     ReconcileOptions::default(),
//! );
//! let stats = engine.run().await?;
//! assert_eq!(stats.orphans, 1);
//! assert_eq!(stats.deleted, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod address;
pub mod backends;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod journal;
pub mod reconcile;
pub mod registry;
pub mod scanner;
pub mod tenant;

// Re-export commonly used types at crate root
pub use address::PayloadAddress;
pub use error::{ErrorKind, PayloadError, PayloadResult};
pub use tenant::{DatastoreId, DatastoreKey, TenantId};

// Re-export core traits
pub use core::{PayloadScan, PayloadStore, ScannablePayloadStore, SharedPayloadStore, SystemOfRecord};

pub use checkpoint::CheckpointTracker;
pub use reconcile::{ReconcileStats, ReconciliationEngine};
pub use registry::{PayloadStoreFactory, PayloadStoreRegistry};
pub use scanner::{ScanOutcome, TokenRangeScanner};

/// Imports for typical use of the crate.
pub mod prelude {
    pub use crate::address::PayloadAddress;
    pub use crate::backends::{MemoryPayloadStore, MemorySystemOfRecord};
    pub use crate::config::{PayloadStoreSettings, ReconcileOptions};
    pub use crate::core::{
        DeleteOutcome, MetadataRow, PayloadScan, PayloadStore, Ready, ScanCursor, ScanRange,
        SharedPayloadStore, SystemOfRecord,
    };
    pub use crate::error::{ErrorKind, PayloadError, PayloadResult};
    pub use crate::reconcile::{ReconcileStats, ReconciliationEngine};
    pub use crate::tenant::DatastoreKey;
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
