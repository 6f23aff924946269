use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::{MetadataRow, SystemOfRecord};
use crate::error::{BackendError, PayloadResult};

type VersionKey = (u32, String, u32);

/// In-process system of record keyed by resource version.
#[derive(Debug, Default)]
pub struct MemorySystemOfRecord {
    rows: RwLock<HashMap<VersionKey, Option<String>>>,
    fail_lookups_for: RwLock<Vec<String>>,
}

impl MemorySystemOfRecord {
    /// Creates an empty system of record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a version whose payload is offloaded under `payload_key`.
    pub fn insert(&self, resource_type_id: u32, logical_id: &str, version: u32, payload_key: &str) {
        self.rows.write().insert(
            (resource_type_id, logical_id.to_string(), version),
            Some(payload_key.to_string()),
        );
    }

    /// Records a version whose payload is kept in the relational store.
    pub fn insert_inline(&self, resource_type_id: u32, logical_id: &str, version: u32) {
        self.rows
            .write()
            .insert((resource_type_id, logical_id.to_string(), version), None);
    }

    /// Removes a version's metadata row.
    pub fn remove(&self, resource_type_id: u32, logical_id: &str, version: u32) -> bool {
        self.rows
            .write()
            .remove(&(resource_type_id, logical_id.to_string(), version))
            .is_some()
    }

    /// Makes every lookup of `logical_id` fail, to exercise per-record
    /// failure handling.
    pub fn fail_lookups_for(&self, logical_id: &str) {
        self.fail_lookups_for.write().push(logical_id.to_string());
    }

    /// Number of metadata rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if no rows are recorded.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl SystemOfRecord for MemorySystemOfRecord {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn lookup(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: u32,
    ) -> PayloadResult<MetadataRow> {
        if self
            .fail_lookups_for
            .read()
            .iter()
            .any(|id| id == logical_id)
        {
            return Err(BackendError::internal(
                "memory",
                format!("lookup of {resource_type_id}/{logical_id}/{version} failed"),
            )
            .into());
        }

        let rows = self.rows.read();
        Ok(
            match rows.get(&(resource_type_id, logical_id.to_string(), version)) {
                Some(payload_key) => MetadataRow::Present {
                    payload_key: payload_key.clone(),
                },
                None => MetadataRow::Missing,
            },
        )
    }
}
