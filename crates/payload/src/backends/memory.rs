use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::address::PayloadAddress;
use crate::codec::PayloadCodec;
use crate::core::{
    DeleteOutcome, PayloadBackendKind, ResourceRecord, ScanCursor, ScanRange, StoreAck,
    SyncPayloadStore,
};
use crate::error::PayloadResult;

use super::partition_token;

#[derive(Debug, Clone)]
struct StoredPayload {
    bytes: Vec<u8>,
    written_at: DateTime<Utc>,
}

/// In-process payload store that orders payloads like a wide-column store.
///
/// The cursor of a payload is the token of its `(resource_type_id,
/// logical_id)` partition, so all versions of a logical resource share one
/// cursor. Operations complete synchronously; wrap the store in
/// [`Ready`](crate::core::Ready) to use it through the asynchronous traits.
#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    partitions: RwLock<BTreeMap<ScanCursor, BTreeMap<PayloadAddress, StoredPayload>>>,
    codec: PayloadCodec,
}

impl MemoryPayloadStore {
    /// Creates an empty store holding payloads uncompressed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with the given codec.
    pub fn with_codec(codec: PayloadCodec) -> Self {
        Self {
            partitions: RwLock::default(),
            codec,
        }
    }

    /// The cursor every payload of `address`'s partition is scanned at.
    pub fn cursor_of(address: &PayloadAddress) -> ScanCursor {
        ScanCursor::from_token(partition_token(
            address.resource_type_id(),
            address.logical_id(),
        ))
    }

    /// Stores a payload with an explicit write time.
    pub fn insert_with_timestamp(
        &self,
        address: &PayloadAddress,
        payload: &[u8],
        written_at: DateTime<Utc>,
    ) -> PayloadResult<StoreAck> {
        let bytes = self.codec.encode(payload)?;
        let stored_bytes = bytes.len();
        self.partitions
            .write()
            .entry(Self::cursor_of(address))
            .or_default()
            .insert(address.clone(), StoredPayload { bytes, written_at });
        Ok(StoreAck {
            address: address.clone(),
            stored_bytes,
        })
    }

    /// Returns every stored address in scan order.
    pub fn addresses(&self) -> Vec<PayloadAddress> {
        self.partitions
            .read()
            .values()
            .flat_map(|partition| partition.keys().cloned())
            .collect()
    }

    /// Number of stored payloads.
    pub fn len(&self) -> usize {
        self.partitions.read().values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.partitions.read().is_empty()
    }
}

impl SyncPayloadStore for MemoryPayloadStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn kind(&self) -> PayloadBackendKind {
        PayloadBackendKind::Memory
    }

    fn store_sync(&self, address: &PayloadAddress, payload: &[u8]) -> PayloadResult<StoreAck> {
        self.insert_with_timestamp(address, payload, Utc::now())
    }

    fn read_sync(&self, address: &PayloadAddress) -> PayloadResult<Option<Vec<u8>>> {
        let partitions = self.partitions.read();
        partitions
            .get(&Self::cursor_of(address))
            .and_then(|partition| partition.get(address))
            .map(|stored| self.codec.decode(&stored.bytes))
            .transpose()
    }

    fn delete_sync(&self, address: &PayloadAddress) -> PayloadResult<DeleteOutcome> {
        let cursor = Self::cursor_of(address);
        let mut partitions = self.partitions.write();
        let Some(partition) = partitions.get_mut(&cursor) else {
            return Ok(DeleteOutcome::NotFound);
        };
        let removed = partition.remove(address).is_some();
        if partition.is_empty() {
            partitions.remove(&cursor);
        }
        Ok(if removed {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    fn erase_sync(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: Option<u32>,
    ) -> PayloadResult<u64> {
        let cursor = ScanCursor::from_token(partition_token(resource_type_id, logical_id));
        let mut partitions = self.partitions.write();
        let Some(partition) = partitions.get_mut(&cursor) else {
            return Ok(0);
        };
        let before = partition.len();
        partition.retain(|address, _| {
            !(address.resource_type_id() == resource_type_id
                && address.logical_id() == logical_id
                && version.is_none_or(|v| address.version() == v))
        });
        let removed = (before - partition.len()) as u64;
        if partition.is_empty() {
            partitions.remove(&cursor);
        }
        Ok(removed)
    }

    fn fetch_page_sync(
        &self,
        range: &ScanRange,
        limit: usize,
    ) -> PayloadResult<Vec<ResourceRecord>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let partitions = self.partitions.read();
        let records = partitions
            .range(range.start.clone()..)
            .take_while(|(cursor, _)| range.contains(cursor))
            .flat_map(|(cursor, partition)| {
                partition.iter().map(move |(address, stored)| {
                    ResourceRecord::new(cursor.clone(), address.clone())
                        .with_last_modified(stored.written_at)
                })
            })
            .take(limit)
            .collect();
        Ok(records)
    }
}
