//! Settings objects for payload stores, systems of record and
//! reconciliation runs.
//!
//! These are plain serde types. The library never reads the environment;
//! whatever loads tenant configuration hands the settings in.
//!
//! ```
//! use helios_payload::config::{BackendSettings, PayloadStoreSettings};
//!
//! let settings: PayloadStoreSettings = serde_json::from_str(
//!     r#"{"backend": {"type": "memory"}, "compress": true}"#,
//! ).unwrap();
//! assert_eq!(settings.backend, BackendSettings::Memory);
//! assert_eq!(settings.page_size, 1024);
//! settings.validate().unwrap();
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backends::cassandra::CassandraPayloadConfig;
use crate::backends::s3::S3PayloadConfig;
use crate::codec::{DEFAULT_COMPRESSION_LEVEL, PayloadCodec};
use crate::core::PayloadBackendKind;
use crate::error::{BackendError, PayloadResult};

/// Backend selection and its connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendSettings {
    /// In-process store.
    Memory,
    /// S3-compatible object storage.
    S3(S3PayloadConfig),
    /// Apache Cassandra.
    Cassandra(CassandraPayloadConfig),
}

impl BackendSettings {
    /// Returns the backend kind this selects.
    pub fn kind(&self) -> PayloadBackendKind {
        match self {
            BackendSettings::Memory => PayloadBackendKind::Memory,
            BackendSettings::S3(_) => PayloadBackendKind::S3,
            BackendSettings::Cassandra(_) => PayloadBackendKind::Cassandra,
        }
    }
}

/// Settings of one tenant datastore's payload store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadStoreSettings {
    /// Backend and connection parameters.
    pub backend: BackendSettings,

    /// Records per scan page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Compress new payloads with zstd.
    #[serde(default)]
    pub compress: bool,

    /// zstd level used when `compress` is set.
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

fn default_page_size() -> usize {
    1024
}

fn default_compression_level() -> i32 {
    DEFAULT_COMPRESSION_LEVEL
}

impl Default for PayloadStoreSettings {
    fn default() -> Self {
        Self::new(BackendSettings::Memory)
    }
}

impl PayloadStoreSettings {
    /// Settings for `backend` with default common fields.
    pub fn new(backend: BackendSettings) -> Self {
        Self {
            backend,
            page_size: default_page_size(),
            compress: false,
            compression_level: default_compression_level(),
        }
    }

    /// Validates the common fields and the backend's own settings.
    pub fn validate(&self) -> PayloadResult<()> {
        let backend_name = self.backend.kind().to_string();
        if self.page_size == 0 {
            return Err(BackendError::configuration(&backend_name, "page_size must be > 0").into());
        }
        if self.compress && !(1..=22).contains(&self.compression_level) {
            return Err(BackendError::configuration(
                &backend_name,
                format!(
                    "compression_level must be between 1 and 22, got {}",
                    self.compression_level
                ),
            )
            .into());
        }
        match &self.backend {
            BackendSettings::Memory => Ok(()),
            BackendSettings::S3(config) => config.validate(),
            BackendSettings::Cassandra(config) => config.validate(),
        }
    }

    /// The payload codec these settings select.
    pub fn codec(&self) -> PayloadCodec {
        PayloadCodec::new(self.compress, self.compression_level)
    }
}

/// Settings of the SQLite system-of-record adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteSorConfig {
    /// Database file, or `:memory:`.
    pub path: String,

    /// Query returning the payload key of one version. Bound parameters:
    /// `?1` resource type id, `?2` logical id, `?3` version.
    #[serde(default = "default_lookup_query")]
    pub lookup_query: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Pool checkout timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,
}

fn default_lookup_query() -> String {
    "SELECT resource_payload_key FROM resource_versions \
     WHERE resource_type_id = ?1 AND logical_id = ?2 AND version_id = ?3"
        .to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

impl Default for SqliteSorConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            lookup_query: default_lookup_query(),
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Which system of record a datastore's reconciliation consults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemOfRecordSettings {
    /// In-process metadata, empty at start.
    Memory,
    /// SQLite database.
    Sqlite(SqliteSorConfig),
}

/// Complete settings of one tenant datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreSettings {
    /// Payload store settings.
    pub payload: PayloadStoreSettings,
    /// System-of-record settings.
    pub system_of_record: SystemOfRecordSettings,
}

/// Options of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Count and log orphans without deleting them.
    #[serde(default)]
    pub dry_run: bool,

    /// Maximum per-record checks in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Scan page size; the store settings' page size when unset.
    #[serde(default)]
    pub page_size: Option<usize>,

    /// Skip payloads written more recently than this.
    #[serde(default, with = "humantime_serde_opt")]
    pub min_age: Option<Duration>,
}

fn default_concurrency() -> usize {
    16
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            concurrency: default_concurrency(),
            page_size: None,
            min_age: None,
        }
    }
}

impl ReconcileOptions {
    /// Options for a dry run.
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Default::default()
        }
    }
}

/// Serde module for optional Duration with humantime format.
mod humantime_serde_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => {
                serializer.serialize_str(&humantime::format_duration(*duration).to_string())
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
