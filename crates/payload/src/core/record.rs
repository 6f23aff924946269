//! Scanned payload records and the system-of-record contract.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::address::PayloadAddress;
use crate::error::PayloadResult;

use super::cursor::ScanCursor;

/// Minimal projection of one stored payload, as seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Scan position of the record. Not unique: records of one partition
    /// share a cursor in token-ordered stores.
    pub cursor: ScanCursor,
    /// Address of the stored payload.
    pub address: PayloadAddress,
    /// When the payload was written, if the backend records it.
    pub last_modified: Option<DateTime<Utc>>,
}

impl ResourceRecord {
    /// Creates a record without a modification timestamp.
    pub fn new(cursor: ScanCursor, address: PayloadAddress) -> Self {
        Self {
            cursor,
            address,
            last_modified: None,
        }
    }

    /// Sets the modification timestamp.
    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// Returns the resource type id.
    pub fn resource_type_id(&self) -> u32 {
        self.address.resource_type_id()
    }

    /// Returns the logical id.
    pub fn logical_id(&self) -> &str {
        self.address.logical_id()
    }

    /// Returns the version.
    pub fn version(&self) -> u32 {
        self.address.version()
    }

    /// Returns the payload key.
    pub fn payload_key(&self) -> &str {
        self.address.payload_key()
    }
}

/// What the system of record knows about one resource version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataRow {
    /// No metadata row exists for the version.
    Missing,
    /// A row exists. `payload_key` is `None` when the payload is kept in
    /// the relational store rather than offloaded.
    Present {
        /// Key of the offloaded payload.
        payload_key: Option<String>,
    },
}

impl MetadataRow {
    /// A present row referencing the given payload key.
    pub fn offloaded(payload_key: impl Into<String>) -> Self {
        MetadataRow::Present {
            payload_key: Some(payload_key.into()),
        }
    }

    /// Returns true if this row references the payload stored at `address`.
    pub fn references(&self, address: &PayloadAddress) -> bool {
        match self {
            MetadataRow::Missing => false,
            MetadataRow::Present { payload_key } => {
                payload_key.as_deref() == Some(address.payload_key())
            }
        }
    }
}

/// The read contract the payload layer requires from the relational system
/// of record.
///
/// This is the only query shape reconciliation needs: the metadata row for
/// `(resource_type_id, logical_id, version)` and its payload key.
#[async_trait]
pub trait SystemOfRecord: Send + Sync + Debug {
    /// Returns a short name for logs.
    fn name(&self) -> &'static str;

    /// Looks up the metadata row of one resource version.
    async fn lookup(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: u32,
    ) -> PayloadResult<MetadataRow>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_row_references() {
        let address = PayloadAddress::new(1, "p1", 1, "k1").unwrap();
        assert!(MetadataRow::offloaded("k1").references(&address));
        assert!(!MetadataRow::offloaded("k9").references(&address));
        assert!(!MetadataRow::Present { payload_key: None }.references(&address));
        assert!(!MetadataRow::Missing.references(&address));
    }
}
