//! The pluggable payload store contract.
//!
//! [`PayloadStore`] is the capability every backend implements: store, read
//! and delete a payload by its [`PayloadAddress`], plus [`erase`] of every
//! payload of a logical resource. [`PayloadScan`] adds token-ordered paging
//! for reconciliation.
//!
//! The asynchronous methods are the primary interface. Backends without a
//! native asynchronous client implement [`SyncPayloadStore`] instead and are
//! exposed through [`Ready`], whose futures are already resolved when first
//! polled, so no thread is spawned per call. [`BlockingPayloadStore`] offers
//! synchronous calls over any asynchronous store.
//!
//! [`erase`]: PayloadStore::erase

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::address::PayloadAddress;
use crate::error::{PayloadError, PayloadResult};

use super::cursor::ScanRange;
use super::record::ResourceRecord;

/// Identifies the kind of payload backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadBackendKind {
    /// In-process wide-column emulation.
    Memory,
    /// S3-compatible object storage.
    S3,
    /// Apache Cassandra (wide-column store).
    Cassandra,
}

impl fmt::Display for PayloadBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadBackendKind::Memory => write!(f, "memory"),
            PayloadBackendKind::S3 => write!(f, "s3"),
            PayloadBackendKind::Cassandra => write!(f, "cassandra"),
        }
    }
}

/// Acknowledgement of a successful store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreAck {
    /// Address the payload was written to.
    pub address: PayloadAddress,
    /// Number of bytes written to the backend, after encoding.
    pub stored_bytes: usize,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The payload existed and was removed.
    Deleted,
    /// Nothing was stored at the address.
    NotFound,
}

/// Store, read and delete resource payloads.
///
/// Implementations must be safe to share across concurrent callers. Writes
/// are idempotent per address; callers use a new payload key per write
/// attempt so a retried write never overwrites a payload another reader may
/// already see.
#[async_trait]
pub trait PayloadStore: Send + Sync + Debug {
    /// Returns a short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Returns the backend kind.
    fn kind(&self) -> PayloadBackendKind;

    /// Stores `payload` at `address`.
    async fn store(&self, address: &PayloadAddress, payload: &[u8]) -> PayloadResult<StoreAck>;

    /// Reads the payload at `address`; `Ok(None)` if absent.
    async fn read(&self, address: &PayloadAddress) -> PayloadResult<Option<Vec<u8>>>;

    /// Deletes the payload at `address`.
    async fn delete(&self, address: &PayloadAddress) -> PayloadResult<DeleteOutcome>;

    /// Deletes every payload of a logical resource, or of one of its
    /// versions, whatever its payload key. Returns the number removed.
    async fn erase(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: Option<u32>,
    ) -> PayloadResult<u64>;

    /// Reads a payload that must exist.
    async fn read_required(&self, address: &PayloadAddress) -> PayloadResult<Vec<u8>> {
        self.read(address)
            .await?
            .ok_or_else(|| PayloadError::NotFound {
                address: address.to_string(),
            })
    }

    /// Dispatches every read concurrently and collects the results in input
    /// order. `None` entries (deleted resources have no payload) yield
    /// `Ok(None)` without touching the backend.
    async fn read_many(
        &self,
        addresses: &[Option<PayloadAddress>],
    ) -> Vec<PayloadResult<Option<Vec<u8>>>> {
        let reads = addresses.iter().map(|address| async move {
            match address {
                Some(address) => self.read(address).await,
                None => Ok(None),
            }
        });
        join_all(reads).await
    }
}

/// Token-ordered paging over a payload store.
#[async_trait]
pub trait PayloadScan: Send + Sync {
    /// Returns at most `limit` records whose cursor lies in `range`, in
    /// non-decreasing cursor order.
    async fn fetch_page(&self, range: &ScanRange, limit: usize)
    -> PayloadResult<Vec<ResourceRecord>>;
}

/// A payload store that can also be scanned.
pub trait ScannablePayloadStore: PayloadStore + PayloadScan {}

impl<T: PayloadStore + PayloadScan + ?Sized> ScannablePayloadStore for T {}

/// Shared handle to a scannable payload store.
pub type SharedPayloadStore = Arc<dyn ScannablePayloadStore>;

/// Blocking form of the payload store contract, for backends without a
/// native asynchronous client.
pub trait SyncPayloadStore: Send + Sync + Debug {
    /// Returns a short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Returns the backend kind.
    fn kind(&self) -> PayloadBackendKind;

    /// See [`PayloadStore::store`].
    fn store_sync(&self, address: &PayloadAddress, payload: &[u8]) -> PayloadResult<StoreAck>;

    /// See [`PayloadStore::read`].
    fn read_sync(&self, address: &PayloadAddress) -> PayloadResult<Option<Vec<u8>>>;

    /// See [`PayloadStore::delete`].
    fn delete_sync(&self, address: &PayloadAddress) -> PayloadResult<DeleteOutcome>;

    /// See [`PayloadStore::erase`].
    fn erase_sync(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: Option<u32>,
    ) -> PayloadResult<u64>;

    /// See [`PayloadScan::fetch_page`].
    fn fetch_page_sync(
        &self,
        range: &ScanRange,
        limit: usize,
    ) -> PayloadResult<Vec<ResourceRecord>>;
}

/// Exposes a [`SyncPayloadStore`] through the asynchronous traits.
///
/// Each call computes its result synchronously and returns it as an
/// already-completed future. This is an adapter, not a performance
/// guarantee: the calling task is occupied for the duration of the call.
#[derive(Debug)]
pub struct Ready<S>(S);

impl<S: SyncPayloadStore> Ready<S> {
    /// Wraps a synchronous store.
    pub fn new(inner: S) -> Self {
        Self(inner)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.0
    }
}

#[async_trait]
impl<S: SyncPayloadStore> PayloadStore for Ready<S> {
    fn backend_name(&self) -> &'static str {
        self.0.backend_name()
    }

    fn kind(&self) -> PayloadBackendKind {
        self.0.kind()
    }

    async fn store(&self, address: &PayloadAddress, payload: &[u8]) -> PayloadResult<StoreAck> {
        self.0.store_sync(address, payload)
    }

    async fn read(&self, address: &PayloadAddress) -> PayloadResult<Option<Vec<u8>>> {
        self.0.read_sync(address)
    }

    async fn delete(&self, address: &PayloadAddress) -> PayloadResult<DeleteOutcome> {
        self.0.delete_sync(address)
    }

    async fn erase(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: Option<u32>,
    ) -> PayloadResult<u64> {
        self.0.erase_sync(resource_type_id, logical_id, version)
    }
}

#[async_trait]
impl<S: SyncPayloadStore> PayloadScan for Ready<S> {
    async fn fetch_page(
        &self,
        range: &ScanRange,
        limit: usize,
    ) -> PayloadResult<Vec<ResourceRecord>> {
        self.0.fetch_page_sync(range, limit)
    }
}

/// Synchronous access to an asynchronous payload store.
///
/// Calls block the current thread on the given runtime handle. They must
/// not be made from inside an asynchronous context of that runtime.
#[derive(Debug, Clone)]
pub struct BlockingPayloadStore {
    inner: Arc<dyn PayloadStore>,
    handle: tokio::runtime::Handle,
}

impl BlockingPayloadStore {
    /// Creates a blocking view of `inner` driven by `handle`.
    pub fn new(inner: Arc<dyn PayloadStore>, handle: tokio::runtime::Handle) -> Self {
        Self { inner, handle }
    }

    /// Blocking [`PayloadStore::store`].
    pub fn store(&self, address: &PayloadAddress, payload: &[u8]) -> PayloadResult<StoreAck> {
        self.handle.block_on(self.inner.store(address, payload))
    }

    /// Blocking [`PayloadStore::read`].
    pub fn read(&self, address: &PayloadAddress) -> PayloadResult<Option<Vec<u8>>> {
        self.handle.block_on(self.inner.read(address))
    }

    /// Blocking [`PayloadStore::delete`].
    pub fn delete(&self, address: &PayloadAddress) -> PayloadResult<DeleteOutcome> {
        self.handle.block_on(self.inner.delete(address))
    }
}
