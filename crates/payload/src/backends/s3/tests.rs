use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::address::PayloadAddress;
use crate::backends::s3::client::{
    ListObjectItem, ListObjectsResult, ListRequest, ObjectData, ObjectMetadata, S3Api,
    S3ClientError,
};
use crate::backends::s3::config::{S3PayloadConfig, S3TenancyMode};
use crate::backends::s3::store::S3PayloadStore;
use crate::codec::PayloadCodec;
use crate::core::{DeleteOutcome, PayloadScan, PayloadStore, ScanCursor, ScanRange};
use crate::error::{ErrorKind, PayloadError};
use crate::scanner::{ScanOutcome, TokenRangeScanner};
use crate::tenant::DatastoreKey;

#[derive(Debug, Clone)]
struct MockObject {
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MockState {
    buckets: HashSet<String>,
    objects: BTreeMap<(String, String), MockObject>,
    list_calls: u64,
    throttle_lists: bool,
    fail_deletes: bool,
}

#[derive(Debug, Clone, Default)]
struct MockS3Client {
    state: Arc<Mutex<MockState>>,
}

impl MockS3Client {
    fn with_buckets(buckets: &[&str]) -> Self {
        let state = MockState {
            buckets: buckets.iter().map(|b| (*b).to_string()).collect(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn put_raw(&self, bucket: &str, key: &str, body: &[u8]) {
        let mut state = self.state.lock();
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            MockObject {
                body: body.to_vec(),
                last_modified: Utc::now(),
            },
        );
    }

    fn keys(&self, bucket: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn list_calls(&self) -> u64 {
        self.state.lock().list_calls
    }
}

#[async_trait]
impl S3Api for MockS3Client {
    async fn head_bucket(&self, bucket: &str) -> Result<(), S3ClientError> {
        let state = self.state.lock();
        if state.buckets.contains(bucket) {
            Ok(())
        } else {
            Err(S3ClientError::NotFound)
        }
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, S3ClientError> {
        let state = self.state.lock();
        Ok(state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| ObjectMetadata {
                etag: None,
                last_modified: Some(object.last_modified),
                size: object.body.len() as i64,
            }))
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectData>, S3ClientError> {
        let state = self.state.lock();
        Ok(state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| ObjectData {
                bytes: object.body.clone(),
                metadata: ObjectMetadata {
                    etag: None,
                    last_modified: Some(object.last_modified),
                    size: object.body.len() as i64,
                },
            }))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<ObjectMetadata, S3ClientError> {
        let mut state = self.state.lock();
        if !state.buckets.contains(bucket) {
            return Err(S3ClientError::NotFound);
        }
        let size = body.len() as i64;
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            MockObject {
                body,
                last_modified: Utc::now(),
            },
        );
        Ok(ObjectMetadata {
            etag: None,
            last_modified: None,
            size,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ClientError> {
        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(S3ClientError::Internal("forced delete failure".to_string()));
        }
        state.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        request: ListRequest<'_>,
    ) -> Result<ListObjectsResult, S3ClientError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        if state.throttle_lists {
            return Err(S3ClientError::Throttled("SlowDown".to_string()));
        }

        let keys = state
            .objects
            .iter()
            .filter(|((b, key), _)| {
                b == bucket
                    && key.starts_with(request.prefix)
                    && request.start_after.is_none_or(|after| key.as_str() > after)
            })
            .map(|((_, key), value)| ListObjectItem {
                key: key.clone(),
                last_modified: Some(value.last_modified),
                size: value.body.len() as i64,
            })
            .collect::<Vec<_>>();

        let start = request
            .continuation
            .and_then(|token| token.parse::<usize>().ok())
            .unwrap_or(0)
            .min(keys.len());
        let max = request.max_keys.unwrap_or(1000).max(1) as usize;
        let end = start.saturating_add(max).min(keys.len());

        let items = keys[start..end].to_vec();
        let next_continuation_token = if end < keys.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(ListObjectsResult {
            items,
            next_continuation_token,
        })
    }
}

fn config(list_page_size: i32) -> S3PayloadConfig {
    S3PayloadConfig {
        tenancy_mode: S3TenancyMode::PrefixPerTenant {
            bucket: "test-bucket".to_string(),
        },
        prefix: Some("payload".to_string()),
        list_page_size,
        ..Default::default()
    }
}

fn make_store(mock: Arc<MockS3Client>, codec: PayloadCodec) -> S3PayloadStore {
    S3PayloadStore::new(
        mock,
        &config(2),
        &DatastoreKey::new("tenant-a", "default"),
        codec,
    )
    .expect("store")
}

fn addr(type_id: u32, id: &str, version: u32, key: &str) -> PayloadAddress {
    PayloadAddress::new(type_id, id, version, key).unwrap()
}

#[tokio::test]
async fn store_read_delete_under_datastore_root() {
    let mock = Arc::new(MockS3Client::with_buckets(&["test-bucket"]));
    let store = make_store(mock.clone(), PayloadCodec::raw());
    let address = addr(1, "p1", 1, "k1");

    let ack = store.store(&address, b"{\"id\":\"p1\"}").await.unwrap();
    assert_eq!(ack.stored_bytes, 12);
    assert_eq!(
        mock.keys("test-bucket"),
        vec!["payload/tenant-a/default/1/p1/1/k1".to_string()]
    );

    assert_eq!(store.read(&address).await.unwrap().unwrap(), b"{\"id\":\"p1\"}");
    assert_eq!(store.delete(&address).await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(store.delete(&address).await.unwrap(), DeleteOutcome::NotFound);
    assert_eq!(store.read(&address).await.unwrap(), None);
    assert_eq!(
        store.read_required(&address).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn compressed_payloads_read_back() {
    let mock = Arc::new(MockS3Client::with_buckets(&["test-bucket"]));
    let store = make_store(mock.clone(), PayloadCodec::zstd(3));
    let address = addr(1, "p1", 1, "k1");
    let payload = b"{\"resourceType\":\"Patient\"}".repeat(50);

    let ack = store.store(&address, &payload).await.unwrap();
    assert!(ack.stored_bytes < payload.len());
    assert_eq!(store.read(&address).await.unwrap().unwrap(), payload);
}

#[tokio::test]
async fn erase_removes_every_version_of_one_resource() {
    let mock = Arc::new(MockS3Client::with_buckets(&["test-bucket"]));
    let store = make_store(mock.clone(), PayloadCodec::raw());
    for address in [
        addr(1, "p1", 1, "k1"),
        addr(1, "p1", 2, "k2"),
        addr(1, "p1", 2, "k2b"),
        addr(1, "p10", 1, "k3"),
    ] {
        store.store(&address, b"x").await.unwrap();
    }

    assert_eq!(store.erase(1, "p1", Some(2)).await.unwrap(), 2);
    assert_eq!(store.erase(1, "p1", None).await.unwrap(), 1);
    assert_eq!(
        mock.keys("test-bucket"),
        vec!["payload/tenant-a/default/1/p10/1/k3".to_string()]
    );
}

#[tokio::test]
async fn fetch_page_respects_range_and_skips_foreign_keys() {
    let mock = Arc::new(MockS3Client::with_buckets(&["test-bucket"]));
    let store = make_store(mock.clone(), PayloadCodec::raw());
    for address in [
        addr(1, "a", 1, "k"),
        addr(1, "b", 1, "k"),
        addr(1, "c", 1, "k"),
        addr(2, "a", 1, "k"),
    ] {
        store.store(&address, b"x").await.unwrap();
    }
    mock.put_raw("test-bucket", "payload/tenant-a/default/1/README", b"?");
    mock.put_raw("test-bucket", "payload/tenant-b/default/1/a/1/k", b"x");

    let all = store.fetch_page(&ScanRange::full(), 100).await.unwrap();
    let paths: Vec<String> = all.iter().map(|r| r.address.path()).collect();
    assert_eq!(paths, vec!["1/a/1/k", "1/b/1/k", "1/c/1/k", "2/a/1/k"]);
    assert!(all.iter().all(|r| r.last_modified.is_some()));

    let range = ScanRange::between(ScanCursor::from_key("1/b/1/k"), ScanCursor::from_key("2"));
    let page = store.fetch_page(&range, 100).await.unwrap();
    let paths: Vec<String> = page.iter().map(|r| r.address.path()).collect();
    assert_eq!(paths, vec!["1/b/1/k", "1/c/1/k"]);

    let page = store.fetch_page(&ScanRange::full(), 3).await.unwrap();
    assert_eq!(page.len(), 3);
    // list_page_size is 2, so three records need two listing calls.
    assert!(mock.list_calls() >= 2);
}

#[tokio::test]
async fn scanner_visits_every_object_once() {
    let mock = Arc::new(MockS3Client::with_buckets(&["test-bucket"]));
    let store = make_store(mock.clone(), PayloadCodec::raw());
    let mut expected = Vec::new();
    for i in 0..7 {
        let address = addr(3, &format!("r{i}"), 1, "k");
        store.store(&address, b"x").await.unwrap();
        expected.push(address);
    }

    let scanner = TokenRangeScanner::new(Arc::new(store)).with_page_size(3);
    let records = scanner.scan_all(ScanCursor::MIN).await.unwrap();
    let visited: Vec<PayloadAddress> = records.into_iter().map(|r| r.address).collect();
    assert_eq!(visited, expected);

    let outcome = scanner
        .run(&ScanCursor::MIN, |_| true)
        .await
        .unwrap();
    assert!(matches!(outcome, ScanOutcome::Advanced { .. }));
}

#[tokio::test]
async fn throttled_listing_is_transient() {
    let mock = Arc::new(MockS3Client::with_buckets(&["test-bucket"]));
    let store = make_store(mock.clone(), PayloadCodec::raw());
    mock.state.lock().throttle_lists = true;

    let err = store.fetch_page(&ScanRange::full(), 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientIo);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn failed_delete_surfaces_backend_error() {
    let mock = Arc::new(MockS3Client::with_buckets(&["test-bucket"]));
    let store = make_store(mock.clone(), PayloadCodec::raw());
    let address = addr(1, "p1", 1, "k1");
    store.store(&address, b"x").await.unwrap();
    mock.state.lock().fail_deletes = true;

    let err = store.delete(&address).await.unwrap_err();
    assert!(matches!(err, PayloadError::Backend(_)));
    assert_eq!(err.kind(), ErrorKind::Fatal);
}

#[tokio::test]
async fn bucket_per_tenant_uses_datastore_root() {
    let mock = Arc::new(MockS3Client::with_buckets(&["bucket-a"]));
    let config = S3PayloadConfig {
        tenancy_mode: S3TenancyMode::BucketPerTenant {
            tenant_bucket_map: HashMap::from([("tenant-a".to_string(), "bucket-a".to_string())]),
            default_bucket: None,
        },
        ..Default::default()
    };
    let store = S3PayloadStore::new(
        mock.clone(),
        &config,
        &DatastoreKey::new("tenant-a", "ds2"),
        PayloadCodec::raw(),
    )
    .unwrap();
    assert_eq!(store.bucket(), "bucket-a");
    assert_eq!(store.root(), "ds2/");
    store.validate_bucket().await.unwrap();

    store.store(&addr(1, "p1", 1, "k1"), b"x").await.unwrap();
    assert_eq!(mock.keys("bucket-a"), vec!["ds2/1/p1/1/k1".to_string()]);

    let missing = S3PayloadStore::new(
        mock,
        &config,
        &DatastoreKey::new("tenant-z", "ds2"),
        PayloadCodec::raw(),
    );
    assert_eq!(missing.unwrap_err().kind(), ErrorKind::Fatal);
}
