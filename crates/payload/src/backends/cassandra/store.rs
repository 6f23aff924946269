use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::address::PayloadAddress;
use crate::codec::PayloadCodec;
use crate::core::{
    DeleteOutcome, PayloadBackendKind, PayloadScan, PayloadStore, ResourceRecord, ScanCursor,
    ScanRange, StoreAck,
};
use crate::error::{FormatError, PayloadError, PayloadResult};

use super::api::{CqlApi, PayloadRow, PayloadRowKey, TokenRow, map_cql_error};

/// Payload store over a Cassandra table partitioned by
/// `(resource_type_id, logical_id)`.
///
/// Scan cursors are partition tokens, so every version of one logical
/// resource shares a cursor.
#[derive(Debug)]
pub struct CassandraPayloadStore {
    api: Arc<dyn CqlApi>,
    keyspace: String,
    codec: PayloadCodec,
}

impl CassandraPayloadStore {
    /// Creates a store over an open keyspace.
    pub fn new(api: Arc<dyn CqlApi>, keyspace: impl Into<String>, codec: PayloadCodec) -> Self {
        Self {
            api,
            keyspace: keyspace.into(),
            codec,
        }
    }

    /// Connects with the cdrs-tokio driver.
    #[cfg(feature = "cassandra")]
    pub async fn connect(
        config: &super::CassandraPayloadConfig,
        key: &crate::tenant::DatastoreKey,
        codec: PayloadCodec,
    ) -> PayloadResult<Self> {
        config.validate()?;
        let keyspace = config.keyspace_for(key);
        let api = super::cdrs::CdrsCqlApi::connect(config, &keyspace).await?;
        Ok(Self::new(Arc::new(api), keyspace, codec))
    }

    /// Returns the keyspace.
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }
}

fn row_key(address: &PayloadAddress) -> PayloadResult<PayloadRowKey> {
    Ok(PayloadRowKey {
        resource_type_id: to_int("resourceTypeId", address, address.resource_type_id())?,
        logical_id: address.logical_id().to_string(),
        version: to_int("version", address, address.version())?,
        payload_key: address.payload_key().to_string(),
    })
}

fn to_int(field: &'static str, address: &PayloadAddress, value: u32) -> PayloadResult<i32> {
    i32::try_from(value).map_err(|_| {
        PayloadError::Format(FormatError::NotPositive {
            path: address.path(),
            field,
            value: value.to_string(),
        })
    })
}

fn to_record(row: TokenRow) -> PayloadResult<ResourceRecord> {
    let key = row.key;
    let address = PayloadAddress::new(
        u32::try_from(key.resource_type_id).unwrap_or(0),
        key.logical_id,
        u32::try_from(key.version).unwrap_or(0),
        key.payload_key,
    )?;
    let mut record = ResourceRecord::new(ScanCursor::from_token(row.token), address);
    record.last_modified = row.written_at.and_then(DateTime::<Utc>::from_timestamp_millis);
    Ok(record)
}

#[async_trait]
impl PayloadStore for CassandraPayloadStore {
    fn backend_name(&self) -> &'static str {
        "cassandra"
    }

    fn kind(&self) -> PayloadBackendKind {
        PayloadBackendKind::Cassandra
    }

    async fn store(&self, address: &PayloadAddress, payload: &[u8]) -> PayloadResult<StoreAck> {
        let key = row_key(address)?;
        let payload = self.codec.encode(payload)?;
        let stored_bytes = payload.len();
        self.api
            .insert(PayloadRow {
                key,
                payload,
                written_at: Utc::now().timestamp_millis(),
            })
            .await
            .map_err(map_cql_error)?;
        debug!(keyspace = %self.keyspace, address = %address, stored_bytes, "Stored payload");
        Ok(StoreAck {
            address: address.clone(),
            stored_bytes,
        })
    }

    async fn read(&self, address: &PayloadAddress) -> PayloadResult<Option<Vec<u8>>> {
        let key = row_key(address)?;
        let row = self.api.select(&key).await.map_err(map_cql_error)?;
        row.map(|row| self.codec.decode(&row.payload)).transpose()
    }

    async fn delete(&self, address: &PayloadAddress) -> PayloadResult<DeleteOutcome> {
        let key = row_key(address)?;
        let applied = self.api.delete(&key).await.map_err(map_cql_error)?;
        if applied {
            debug!(keyspace = %self.keyspace, address = %address, "Deleted payload");
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn erase(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: Option<u32>,
    ) -> PayloadResult<u64> {
        let type_id = i32::try_from(resource_type_id).map_err(|_| {
            PayloadError::Format(FormatError::NotPositive {
                path: format!("{resource_type_id}/{logical_id}"),
                field: "resourceTypeId",
                value: resource_type_id.to_string(),
            })
        })?;
        let keys = self
            .api
            .list_partition(type_id, logical_id)
            .await
            .map_err(map_cql_error)?;

        let mut removed = 0;
        for key in keys {
            if version.is_some_and(|v| i64::from(v) != i64::from(key.version)) {
                continue;
            }
            if self.api.delete(&key).await.map_err(map_cql_error)? {
                removed += 1;
            }
        }
        debug!(keyspace = %self.keyspace, resource_type_id, logical_id, ?version, removed, "Erased payloads");
        Ok(removed)
    }
}

#[async_trait]
impl PayloadScan for CassandraPayloadStore {
    async fn fetch_page(
        &self,
        range: &ScanRange,
        limit: usize,
    ) -> PayloadResult<Vec<ResourceRecord>> {
        if range.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let Some(lower) = range.start.token_lower_bound() else {
            return Ok(Vec::new());
        };
        let upper = range.end.as_ref().and_then(ScanCursor::token_lower_bound);
        if upper.is_some_and(|upper| upper <= lower) {
            return Ok(Vec::new());
        }
        // Rows that do not map to an address are skipped; ask for more so a
        // short page still means the range is exhausted.
        let mut requested = limit;
        loop {
            let rows = self
                .api
                .scan(lower, upper, i32::try_from(requested).ok())
                .await
                .map_err(map_cql_error)?;
            let returned = rows.len();

            let mut records = Vec::with_capacity(returned);
            for row in rows {
                let token = row.token;
                match to_record(row) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        warn!(keyspace = %self.keyspace, token, error = %err, "Skipping row that is not a payload");
                    }
                }
            }

            if records.len() >= limit || returned < requested {
                records.truncate(limit);
                return Ok(records);
            }
            requested = requested.saturating_add(limit - records.len());
        }
    }
}
