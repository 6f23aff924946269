//! SQLite system of record.
//!
//! Answers the one query reconciliation needs: the payload key of a
//! resource version's metadata row. The query is configurable so the
//! adapter can sit on an existing schema; [`SqliteSystemOfRecord::init_schema`]
//! creates a minimal `resource_versions` table for local use.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};

use crate::config::SqliteSorConfig;
use crate::core::{MetadataRow, SystemOfRecord};
use crate::error::{BackendError, PayloadError, PayloadResult};

/// Metadata table created by [`SqliteSystemOfRecord::init_schema`].
const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS resource_versions (
    resource_type_id INTEGER NOT NULL,
    logical_id TEXT NOT NULL,
    version_id INTEGER NOT NULL,
    resource_payload_key TEXT,
    PRIMARY KEY (resource_type_id, logical_id, version_id)
)";

/// System of record backed by a SQLite database.
pub struct SqliteSystemOfRecord {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteSorConfig,
}

impl Debug for SqliteSystemOfRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSystemOfRecord")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SqliteSystemOfRecord {
    /// Opens an in-memory database with the default schema.
    pub fn in_memory() -> PayloadResult<Self> {
        let sor = Self::with_config(SqliteSorConfig {
            path: ":memory:".to_string(),
            ..Default::default()
        })?;
        sor.init_schema()?;
        Ok(sor)
    }

    /// Opens a database file with the default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> PayloadResult<Self> {
        Self::with_config(SqliteSorConfig {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..Default::default()
        })
    }

    /// Opens the database described by `config`.
    pub fn with_config(config: SqliteSorConfig) -> PayloadResult<Self> {
        let is_memory = config.path == ":memory:";
        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let manager = if is_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&config.path)
        }
        .with_init(move |conn| conn.busy_timeout(busy_timeout));
        // Every in-memory connection is its own database.
        let max_size = if is_memory { 1 } else { config.max_connections };

        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| {
                PayloadError::Backend(BackendError::ConnectionFailed {
                    backend_name: "sqlite".to_string(),
                    message: e.to_string(),
                })
            })?;

        Ok(Self { pool, config })
    }

    /// Creates the `resource_versions` table if missing.
    pub fn init_schema(&self) -> PayloadResult<()> {
        self.get_connection()?.execute(SCHEMA, [])?;
        Ok(())
    }

    /// Inserts or replaces the metadata row of one version.
    ///
    /// Only valid against the schema created by [`init_schema`](Self::init_schema).
    pub fn record_version(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: u32,
        payload_key: Option<&str>,
    ) -> PayloadResult<()> {
        self.get_connection()?.execute(
            "INSERT OR REPLACE INTO resource_versions \
             (resource_type_id, logical_id, version_id, resource_payload_key) \
             VALUES (?1, ?2, ?3, ?4)",
            params![resource_type_id, logical_id, version, payload_key],
        )?;
        Ok(())
    }

    /// Returns the settings this adapter was opened with.
    pub fn config(&self) -> &SqliteSorConfig {
        &self.config
    }

    fn get_connection(&self) -> PayloadResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            PayloadError::Backend(BackendError::ConnectionFailed {
                backend_name: "sqlite".to_string(),
                message: e.to_string(),
            })
        })
    }
}

#[async_trait]
impl SystemOfRecord for SqliteSystemOfRecord {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn lookup(
        &self,
        resource_type_id: u32,
        logical_id: &str,
        version: u32,
    ) -> PayloadResult<MetadataRow> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare_cached(&self.config.lookup_query)?;
        let row: Option<Option<String>> = stmt
            .query_row(params![resource_type_id, logical_id, version], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(match row {
            Some(payload_key) => MetadataRow::Present { payload_key },
            None => MetadataRow::Missing,
        })
    }
}
