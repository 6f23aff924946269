//! Cassandra payload backend.
//!
//! One table per datastore keyspace:
//!
//! ```text
//! resource_payloads (
//!     resource_type_id int, logical_id text, version int,
//!     resource_payload_key text, payload blob, written_at bigint,
//!     PRIMARY KEY ((resource_type_id, logical_id), version, resource_payload_key))
//! ```
//!
//! Scans walk `token(resource_type_id, logical_id)`. The store logic talks
//! to a [`CqlApi`]; the cdrs-tokio driver is compiled with the `cassandra`
//! feature.

mod api;
#[cfg(feature = "cassandra")]
mod cdrs;
mod config;
mod store;


pub use api::{CqlApi, CqlError, PAYLOAD_TABLE, PayloadRow, PayloadRowKey, TokenRow};
#[cfg(feature = "cassandra")]
pub use cdrs::CdrsCqlApi;
pub use config::CassandraPayloadConfig;
pub use store::CassandraPayloadStore;
