//! Payload store and system-of-record implementations.
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | always | In-process wide-column emulation for tests and local runs |
//! | S3 | `s3` | Object storage; cursors are object paths |
//! | Cassandra | `cassandra` | Wide-column store; cursors are partition tokens |
//!
//! The S3 and Cassandra store logic is always compiled and runs against a
//! client trait ([`s3::S3Api`], [`cassandra::CqlApi`]); the features only
//! add the real drivers.
//!
//! Systems of record: [`MemorySystemOfRecord`] and, with the `sqlite`
//! feature, [`sqlite::SqliteSystemOfRecord`].

pub mod cassandra;
mod memory;
mod memory_sor;
pub mod s3;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryPayloadStore;
pub use memory_sor::MemorySystemOfRecord;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic token of the partition `(resource_type_id, logical_id)`.
///
/// Used by the in-memory store to emulate partitioner tokens. Equal inputs
/// always map to the same token; distinct inputs rarely collide.
pub fn partition_token(resource_type_id: u32, logical_id: &str) -> i64 {
    let mut hash = FNV_OFFSET;
    for byte in resource_type_id
        .to_be_bytes()
        .iter()
        .chain(logical_id.as_bytes())
    {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i64
}
