use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::address::PayloadAddress;
use crate::codec::PayloadCodec;
use crate::core::{
    DeleteOutcome, PayloadBackendKind, PayloadScan, PayloadStore, ResourceRecord, ScanCursor,
    ScanRange, StoreAck,
};
use crate::error::PayloadResult;
use crate::tenant::DatastoreKey;

use super::client::{ListRequest, S3Api, map_client_error};
use super::config::S3PayloadConfig;
use super::keyspace::S3Keyspace;

const CONTENT_TYPE: &str = "application/octet-stream";

/// Payload store over S3-compatible object storage.
///
/// Scan cursors are object paths relative to the datastore root, so a scan
/// visits payloads in path order and every cursor is unique.
pub struct S3PayloadStore {
    client: Arc<dyn S3Api>,
    bucket: String,
    keyspace: S3Keyspace,
    codec: PayloadCodec,
    list_page_size: i32,
}

impl fmt::Debug for S3PayloadStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3PayloadStore")
            .field("bucket", &self.bucket)
            .field("root", &self.keyspace.root())
            .field("codec", &self.codec)
            .finish()
    }
}

impl S3PayloadStore {
    /// Creates a store for one tenant datastore over `client`.
    pub fn new(
        client: Arc<dyn S3Api>,
        config: &S3PayloadConfig,
        key: &DatastoreKey,
        codec: PayloadCodec,
    ) -> PayloadResult<Self> {
        config.validate()?;
        let bucket = config.bucket_for(&key.tenant)?;
        let base = config.prefix.as_deref().unwrap_or_default();
        let keyspace = if config.uses_tenant_prefix() {
            S3Keyspace::new(&[base, key.tenant.as_str(), key.datastore.as_str()])
        } else {
            S3Keyspace::new(&[base, key.datastore.as_str()])
        };

        Ok(Self {
            client,
            bucket,
            keyspace,
            codec,
            list_page_size: config.list_page_size,
        })
    }

    /// Connects through the AWS SDK provider chain.
    #[cfg(feature = "s3")]
    pub async fn connect(
        config: &S3PayloadConfig,
        key: &DatastoreKey,
        codec: PayloadCodec,
    ) -> PayloadResult<Self> {
        let client = Arc::new(super::aws::AwsS3Client::connect(config).await);
        let store = Self::new(client, config, key, codec)?;
        if config.validate_bucket_on_startup {
            store.validate_bucket().await?;
        }
        Ok(store)
    }

    /// Checks that the bucket exists and is reachable.
    pub async fn validate_bucket(&self) -> PayloadResult<()> {
        self.client
            .head_bucket(&self.bucket)
            .await
            .map_err(|e| map_client_error(e, &self.bucket))
    }

    /// Returns the bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Returns the key prefix of this datastore.
    pub fn root(&self) -> &str {
        self.keyspace.root()
    }

    async fn delete_prefix(&self, prefix: &str) -> PayloadResult<u64> {
        let mut removed = 0;
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects(
                    &self.bucket,
                    ListRequest {
                        prefix,
                        start_after: None,
                        continuation: continuation.as_deref(),
                        max_keys: Some(self.list_page_size),
                    },
                )
                .await
                .map_err(|e| map_client_error(e, prefix))?;

            for item in page.items {
                self.client
                    .delete_object(&self.bucket, &item.key)
                    .await
                    .map_err(|e| map_client_error(e, &item.key))?;
                removed += 1;
            }

            match page.next_continuation_token {
                Some(token) => continuation = Some(token),
                None => return Ok(removed),
            }
        }
    }
}

#[async_trait]
impl PayloadStore for S3PayloadStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn kind(&self) -> PayloadBackendKind {
        PayloadBackendKind::S3
    }

    async fn store(&self, address: &PayloadAddress, payload: &[u8]) -> PayloadResult<StoreAck> {
        let key = self.keyspace.object_key(address);
        let body = self.codec.encode(payload)?;
        let stored_bytes = body.len();
        self.client
            .put_object(&self.bucket, &key, body, Some(CONTENT_TYPE))
            .await
            .map_err(|e| map_client_error(e, &key))?;
        debug!(bucket = %self.bucket, key = %key, stored_bytes, "Stored payload");
        Ok(StoreAck {
            address: address.clone(),
            stored_bytes,
        })
    }

    async fn read(&self, address: &PayloadAddress) -> PayloadResult<Option<Vec<u8>>> {
        let key = self.keyspace.object_key(address);
        let object = self
            .client
            .get_object(&self.bucket, &key)
            .await
            .map_err(|e| map_client_error(e, &key))?;
        object
            .map(|object| self.codec.decode(&object.bytes))
            .transpose()
    }

    async fn delete(&self, address: &PayloadAddress) -> PayloadResult<DeleteOutcome> {
        let key = self.keyspace.object_key(address);
        // DeleteObject succeeds for missing keys, so presence is checked first.
        let exists = self
            .client
            .head_object(&self.bucket, &key)
            .await
            .map_err(|e| map_client_error(e, &key))?;
        if exists.is_none() {
            return Ok(DeleteOutcome::NotFound);
        }
        self.client
            .delete_object(&self.bucket, &key)
            .await
            .map_err(|e| map_client_error(e, &key))?;
        debug!(bucket = %self.bucket, key = %key, "Deleted payload");
        Ok(DeleteOutcome::Deleted)
    }

    async fn erase(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: Option<u32>,
    ) -> PayloadResult<u64> {
        let prefix = match version {
            Some(version) => self
                .keyspace
                .version_prefix(resource_type_id, logical_id, version),
            None => self.keyspace.logical_prefix(resource_type_id, logical_id),
        };
        let removed = self.delete_prefix(&prefix).await?;
        debug!(bucket = %self.bucket, prefix = %prefix, removed, "Erased payloads");
        Ok(removed)
    }
}

#[async_trait]
impl PayloadScan for S3PayloadStore {
    async fn fetch_page(
        &self,
        range: &ScanRange,
        limit: usize,
    ) -> PayloadResult<Vec<ResourceRecord>> {
        let mut records = Vec::new();
        if range.is_empty() || limit == 0 {
            return Ok(records);
        }

        let start_after = self.keyspace.start_after(&range.start);
        let mut continuation: Option<String> = None;
        loop {
            let remaining = limit.saturating_sub(records.len());
            let max_keys = i32::try_from(remaining)
                .unwrap_or(i32::MAX)
                .min(self.list_page_size);
            let page = self
                .client
                .list_objects(
                    &self.bucket,
                    ListRequest {
                        prefix: self.keyspace.root(),
                        start_after: start_after.as_deref(),
                        continuation: continuation.as_deref(),
                        max_keys: Some(max_keys),
                    },
                )
                .await
                .map_err(|e| map_client_error(e, self.keyspace.root()))?;

            for item in page.items {
                let Some(relative) = self.keyspace.relative(&item.key) else {
                    continue;
                };
                let cursor = ScanCursor::from_key(relative);
                if cursor < range.start {
                    continue;
                }
                if range.end.as_ref().is_some_and(|end| cursor >= *end) {
                    return Ok(records);
                }
                let address = match PayloadAddress::parse(relative) {
                    Ok(address) => address,
                    Err(err) => {
                        warn!(bucket = %self.bucket, key = %item.key, error = %err, "Skipping object that is not a payload");
                        continue;
                    }
                };
                let mut record = ResourceRecord::new(cursor, address);
                record.last_modified = item.last_modified;
                records.push(record);
                if records.len() >= limit {
                    return Ok(records);
                }
            }

            match page.next_continuation_token {
                Some(token) => continuation = Some(token),
                None => return Ok(records),
            }
        }
    }
}
