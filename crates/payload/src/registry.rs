//! Backend selection and the per-datastore store cache.
//!
//! [`PayloadStoreFactory`] turns [`PayloadStoreSettings`] into a store,
//! dispatching on the backend kind. [`PayloadStoreRegistry`] keeps one
//! store session per tenant datastore, created on first use and shared by
//! every caller afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::info;

use crate::backends::MemoryPayloadStore;
#[cfg(feature = "sqlite")]
use crate::backends::sqlite::SqliteSystemOfRecord;
use crate::backends::{MemorySystemOfRecord, cassandra::CassandraPayloadConfig, s3::S3PayloadConfig};
use crate::codec::PayloadCodec;
use crate::config::{BackendSettings, PayloadStoreSettings, SystemOfRecordSettings};
use crate::core::{Ready, SharedPayloadStore, SystemOfRecord};
use crate::error::{BackendError, PayloadResult};
use crate::tenant::DatastoreKey;

/// Creates payload stores from their settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadStoreFactory;

impl PayloadStoreFactory {
    /// Creates the store `settings` describe for `datastore`.
    ///
    /// Fails with [`BackendError::NotEnabled`] when the backend is not
    /// compiled into this build.
    pub async fn create(
        &self,
        datastore: &DatastoreKey,
        settings: &PayloadStoreSettings,
    ) -> PayloadResult<SharedPayloadStore> {
        settings.validate()?;
        let codec = settings.codec();
        info!(
            datastore = %datastore,
            backend = %settings.backend.kind(),
            compress = settings.compress,
            "Creating payload store"
        );
        match &settings.backend {
            BackendSettings::Memory => Ok(Arc::new(Ready::new(MemoryPayloadStore::with_codec(
                codec,
            )))),
            BackendSettings::S3(config) => create_s3(config, datastore, codec).await,
            BackendSettings::Cassandra(config) => create_cassandra(config, datastore, codec).await,
        }
    }
}

#[cfg(feature = "s3")]
async fn create_s3(
    config: &S3PayloadConfig,
    datastore: &DatastoreKey,
    codec: PayloadCodec,
) -> PayloadResult<SharedPayloadStore> {
    let store = crate::backends::s3::S3PayloadStore::connect(config, datastore, codec).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "s3"))]
async fn create_s3(
    _config: &S3PayloadConfig,
    _datastore: &DatastoreKey,
    _codec: PayloadCodec,
) -> PayloadResult<SharedPayloadStore> {
    Err(BackendError::NotEnabled {
        backend_name: "s3".to_string(),
        feature: "s3",
    }
    .into())
}

#[cfg(feature = "cassandra")]
async fn create_cassandra(
    config: &CassandraPayloadConfig,
    datastore: &DatastoreKey,
    codec: PayloadCodec,
) -> PayloadResult<SharedPayloadStore> {
    let store =
        crate::backends::cassandra::CassandraPayloadStore::connect(config, datastore, codec).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "cassandra"))]
async fn create_cassandra(
    _config: &CassandraPayloadConfig,
    _datastore: &DatastoreKey,
    _codec: PayloadCodec,
) -> PayloadResult<SharedPayloadStore> {
    Err(BackendError::NotEnabled {
        backend_name: "cassandra".to_string(),
        feature: "cassandra",
    }
    .into())
}

/// Opens the system of record `settings` describe.
pub fn open_system_of_record(
    settings: &SystemOfRecordSettings,
) -> PayloadResult<Arc<dyn SystemOfRecord>> {
    match settings {
        SystemOfRecordSettings::Memory => Ok(Arc::new(MemorySystemOfRecord::new())),
        #[cfg(feature = "sqlite")]
        SystemOfRecordSettings::Sqlite(config) => {
            Ok(Arc::new(SqliteSystemOfRecord::with_config(config.clone())?))
        }
        #[cfg(not(feature = "sqlite"))]
        SystemOfRecordSettings::Sqlite(_) => Err(BackendError::NotEnabled {
            backend_name: "sqlite".to_string(),
            feature: "sqlite",
        }
        .into()),
    }
}

/// Lazily created, cached payload store sessions keyed by datastore.
///
/// Concurrent first requests for one datastore create a single store; the
/// map lock is never held while a store connects.
#[derive(Debug, Default)]
pub struct PayloadStoreRegistry {
    factory: PayloadStoreFactory,
    stores: Mutex<HashMap<DatastoreKey, Arc<OnceCell<SharedPayloadStore>>>>,
}

impl PayloadStoreRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the datastore's store, creating it on first use.
    ///
    /// A failed creation is not cached; the next call tries again.
    pub async fn get_or_create(
        &self,
        datastore: &DatastoreKey,
        settings: &PayloadStoreSettings,
    ) -> PayloadResult<SharedPayloadStore> {
        let cell = self
            .stores
            .lock()
            .entry(datastore.clone())
            .or_default()
            .clone();
        let store = cell
            .get_or_try_init(|| self.factory.create(datastore, settings))
            .await?;
        Ok(store.clone())
    }

    /// Registers an already created store, replacing any cached one.
    pub fn insert(&self, datastore: DatastoreKey, store: SharedPayloadStore) {
        self.stores
            .lock()
            .insert(datastore, Arc::new(OnceCell::new_with(Some(store))));
    }

    /// Returns the cached store of a datastore, if created.
    pub fn get(&self, datastore: &DatastoreKey) -> Option<SharedPayloadStore> {
        self.stores
            .lock()
            .get(datastore)
            .and_then(|cell| cell.get().cloned())
    }

    /// Drops the cached store of a datastore, e.g. when its tenant is
    /// unloaded.
    pub fn evict(&self, datastore: &DatastoreKey) -> bool {
        self.stores.lock().remove(datastore).is_some()
    }

    /// Number of datastores with a cached store.
    pub fn len(&self) -> usize {
        self.stores
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Returns true if no store has been created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
