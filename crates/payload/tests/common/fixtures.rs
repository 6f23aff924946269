//! Stores and systems of record populated for tests.

use std::sync::Arc;

use helios_payload::backends::{MemoryPayloadStore, MemorySystemOfRecord};
use helios_payload::core::{PayloadStore, Ready};
use helios_payload::{DatastoreKey, PayloadAddress};

/// Shared in-memory store as most tests use it.
pub type MemoryStore = Arc<Ready<MemoryPayloadStore>>;

/// Creates an empty in-memory store.
pub fn memory_store() -> MemoryStore {
    Arc::new(Ready::new(MemoryPayloadStore::new()))
}

/// The datastore every test reconciles.
pub fn datastore() -> DatastoreKey {
    DatastoreKey::new("test-tenant", "default")
}

/// Builds an address, panicking on invalid input.
pub fn addr(resource_type_id: u32, logical_id: &str, version: u32, key: &str) -> PayloadAddress {
    PayloadAddress::new(resource_type_id, logical_id, version, key).expect("valid address")
}

/// A store with consistent and orphaned payloads.
#[derive(Debug)]
pub struct Population {
    /// The payload store.
    pub store: MemoryStore,
    /// Metadata for the committed payloads.
    pub sor: Arc<MemorySystemOfRecord>,
    /// Payloads with metadata.
    pub committed: Vec<PayloadAddress>,
    /// Payloads without metadata.
    pub orphans: Vec<PayloadAddress>,
}

/// Stores `resources` logical ids with `versions` versions each. Every
/// `orphan_every`-th payload gets no metadata row.
pub async fn populate(resources: usize, versions: u32, orphan_every: usize) -> Population {
    let store = memory_store();
    let sor = Arc::new(MemorySystemOfRecord::new());
    let mut committed = Vec::new();
    let mut orphans = Vec::new();

    let mut n = 0;
    for i in 0..resources {
        let logical_id = format!("patient-{i}");
        for version in 1..=versions {
            let address = PayloadAddress::generate(1, logical_id.as_str(), version)
                .expect("valid address");
            store
                .store(&address, format!("{{\"id\":\"{logical_id}\"}}").as_bytes())
                .await
                .expect("store payload");
            n += 1;
            if orphan_every > 0 && n % orphan_every == 0 {
                orphans.push(address);
            } else {
                sor.insert(1, &logical_id, version, address.payload_key());
                committed.push(address);
            }
        }
    }

    Population {
        store,
        sor,
        committed,
        orphans,
    }
}
