//! Fault-injecting payload store wrapper.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use helios_payload::PayloadAddress;
use helios_payload::core::{
    DeleteOutcome, PayloadBackendKind, PayloadScan, PayloadStore, ResourceRecord, ScanRange,
    SharedPayloadStore, StoreAck,
};
use helios_payload::error::{BackendError, PayloadResult};

/// Wraps a store and fails or signals on demand.
#[derive(Debug)]
pub struct FaultyStore {
    inner: SharedPayloadStore,
    fetches: AtomicUsize,
    fail_fetch_from: Mutex<Option<usize>>,
    fail_deletes_for: Mutex<Vec<String>>,
    stop_after: Mutex<Option<(usize, Arc<AtomicBool>)>>,
    deletes: AtomicUsize,
}

impl FaultyStore {
    /// Wraps `inner` without any fault armed.
    pub fn new(inner: SharedPayloadStore) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
            fail_fetch_from: Mutex::new(None),
            fail_deletes_for: Mutex::new(Vec::new()),
            stop_after: Mutex::new(None),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Fails the `n`-th page fetch (1-based) and every one after it.
    pub fn fail_fetches_from(&self, n: usize) {
        *self.fail_fetch_from.lock() = Some(n);
    }

    /// Fails every delete of `logical_id`.
    pub fn fail_deletes_for(&self, logical_id: &str) {
        self.fail_deletes_for.lock().push(logical_id.to_string());
    }

    /// Raises `stop` once `n` page fetches have been served.
    pub fn stop_after_fetches(&self, n: usize, stop: Arc<AtomicBool>) {
        *self.stop_after.lock() = Some((n, stop));
    }

    /// Number of page fetches so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of delete calls so far.
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayloadStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    fn kind(&self) -> PayloadBackendKind {
        self.inner.kind()
    }

    async fn store(&self, address: &PayloadAddress, payload: &[u8]) -> PayloadResult<StoreAck> {
        self.inner.store(address, payload).await
    }

    async fn read(&self, address: &PayloadAddress) -> PayloadResult<Option<Vec<u8>>> {
        self.inner.read(address).await
    }

    async fn delete(&self, address: &PayloadAddress) -> PayloadResult<DeleteOutcome> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_deletes_for
            .lock()
            .iter()
            .any(|id| id == address.logical_id())
        {
            return Err(BackendError::internal("faulty", format!("delete of {address} refused")).into());
        }
        self.inner.delete(address).await
    }

    async fn erase(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: Option<u32>,
    ) -> PayloadResult<u64> {
        self.inner.erase(resource_type_id, logical_id, version).await
    }
}

#[async_trait]
impl PayloadScan for FaultyStore {
    async fn fetch_page(
        &self,
        range: &ScanRange,
        limit: usize,
    ) -> PayloadResult<Vec<ResourceRecord>> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_fetch_from.lock().is_some_and(|from| n >= from) {
            return Err(BackendError::Unavailable {
                backend_name: "faulty".to_string(),
                message: format!("page fetch {n} refused"),
            }
            .into());
        }
        let page = self.inner.fetch_page(range, limit).await;
        if let Some((after, stop)) = self.stop_after.lock().as_ref()
            && n >= *after
        {
            stop.store(true, Ordering::SeqCst);
        }
        page
    }
}
