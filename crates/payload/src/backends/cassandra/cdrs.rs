use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cdrs_tokio::authenticators::StaticPasswordAuthenticatorProvider;
use cdrs_tokio::cluster::session::{Session, SessionBuilder, TcpSessionBuilder};
use cdrs_tokio::cluster::{NodeTcpConfigBuilder, TcpConnectionManager};
use cdrs_tokio::frame::Envelope;
use cdrs_tokio::load_balancing::RoundRobinLoadBalancingStrategy;
use cdrs_tokio::query::QueryValues;
use cdrs_tokio::query_values;
use cdrs_tokio::transport::TransportTcp;
use cdrs_tokio::types::IntoRustByName;
use cdrs_tokio::types::blob::Blob;
use cdrs_tokio::types::rows::Row;
use tracing::info;

use crate::error::{BackendError, PayloadError, PayloadResult};

use super::api::{CqlApi, CqlError, PAYLOAD_TABLE, PayloadRow, PayloadRowKey, TokenRow};
use super::config::CassandraPayloadConfig;

type CdrsSession = Session<
    TransportTcp,
    TcpConnectionManager,
    RoundRobinLoadBalancingStrategy<TransportTcp, TcpConnectionManager>,
>;

/// [`CqlApi`] over the cdrs-tokio driver.
pub struct CdrsCqlApi {
    session: Arc<CdrsSession>,
    table: String,
}

impl fmt::Debug for CdrsCqlApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdrsCqlApi")
            .field("table", &self.table)
            .finish()
    }
}

impl CdrsCqlApi {
    /// Opens a session and, if configured, creates the keyspace and table.
    pub async fn connect(config: &CassandraPayloadConfig, keyspace: &str) -> PayloadResult<Self> {
        let mut builder = NodeTcpConfigBuilder::new();
        for point in &config.contact_points {
            builder = builder.with_contact_point(point.clone().into());
        }
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.with_authenticator_provider(Arc::new(
                StaticPasswordAuthenticatorProvider::new(username.clone(), password.clone()),
            ));
        }
        let cluster_config = builder.build().await.map_err(connection_error)?;
        let session: CdrsSession =
            TcpSessionBuilder::new(RoundRobinLoadBalancingStrategy::new(), cluster_config)
                .build()
                .await
                .map_err(connection_error)?;

        let api = Self {
            session: Arc::new(session),
            table: format!("{keyspace}.{PAYLOAD_TABLE}"),
        };
        if config.create_schema {
            api.create_schema(keyspace, config.replication_factor)
                .await
                .map_err(super::api::map_cql_error)?;
            info!(keyspace, "Ensured payload keyspace and table");
        }
        Ok(api)
    }

    async fn create_schema(&self, keyspace: &str, replication_factor: u32) -> Result<(), CqlError> {
        let create_keyspace = format!(
            "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH replication = \
             {{'class': 'SimpleStrategy', 'replication_factor': {replication_factor}}}"
        );
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             resource_type_id int, logical_id text, version int, resource_payload_key text, \
             payload blob, written_at bigint, \
             PRIMARY KEY ((resource_type_id, logical_id), version, resource_payload_key))",
            self.table
        );
        self.session
            .query(create_keyspace)
            .await
            .map_err(map_driver_error)?;
        self.session
            .query(create_table)
            .await
            .map_err(map_driver_error)?;
        Ok(())
    }

    async fn rows(&self, cql: String, values: QueryValues) -> Result<Vec<Row>, CqlError> {
        let envelope: Envelope = self
            .session
            .query_with_values(cql, values)
            .await
            .map_err(map_driver_error)?;
        let body = envelope.response_body().map_err(map_driver_error)?;
        Ok(body.into_rows().unwrap_or_default())
    }
}

fn key_values(key: &PayloadRowKey) -> QueryValues {
    query_values!(
        key.resource_type_id,
        key.logical_id.clone(),
        key.version,
        key.payload_key.clone()
    )
}

fn row_key(row: &Row) -> Result<PayloadRowKey, CqlError> {
    let resource_type_id: i32 = row
        .get_r_by_name("resource_type_id")
        .map_err(map_driver_error)?;
    let logical_id: String = row.get_r_by_name("logical_id").map_err(map_driver_error)?;
    let version: i32 = row.get_r_by_name("version").map_err(map_driver_error)?;
    let payload_key: String = row
        .get_r_by_name("resource_payload_key")
        .map_err(map_driver_error)?;
    Ok(PayloadRowKey {
        resource_type_id,
        logical_id,
        version,
        payload_key,
    })
}

#[async_trait]
impl CqlApi for CdrsCqlApi {
    async fn insert(&self, row: PayloadRow) -> Result<(), CqlError> {
        let cql = format!(
            "INSERT INTO {} (resource_type_id, logical_id, version, resource_payload_key, payload, written_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            self.table
        );
        let values = query_values!(
            row.key.resource_type_id,
            row.key.logical_id,
            row.key.version,
            row.key.payload_key,
            Blob::new(row.payload),
            row.written_at
        );
        self.session
            .query_with_values(cql, values)
            .await
            .map_err(map_driver_error)?;
        Ok(())
    }

    async fn select(&self, key: &PayloadRowKey) -> Result<Option<PayloadRow>, CqlError> {
        let cql = format!(
            "SELECT payload, written_at FROM {} \
             WHERE resource_type_id = ? AND logical_id = ? AND version = ? AND resource_payload_key = ?",
            self.table
        );
        let rows = self.rows(cql, key_values(key)).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let payload: Blob = row.get_r_by_name("payload").map_err(map_driver_error)?;
        let written_at: Option<i64> = row.get_by_name("written_at").map_err(map_driver_error)?;
        Ok(Some(PayloadRow {
            key: key.clone(),
            payload: payload.into_vec(),
            written_at: written_at.unwrap_or_default(),
        }))
    }

    async fn delete(&self, key: &PayloadRowKey) -> Result<bool, CqlError> {
        let cql = format!(
            "DELETE FROM {} \
             WHERE resource_type_id = ? AND logical_id = ? AND version = ? AND resource_payload_key = ? \
             IF EXISTS",
            self.table
        );
        let rows = self.rows(cql, key_values(key)).await?;
        let Some(row) = rows.first() else {
            return Ok(false);
        };
        let applied: bool = row.get_r_by_name("[applied]").map_err(map_driver_error)?;
        Ok(applied)
    }

    async fn list_partition(
        &self,
        resource_type_id: i32,
        logical_id: &str,
    ) -> Result<Vec<PayloadRowKey>, CqlError> {
        let cql = format!(
            "SELECT resource_type_id, logical_id, version, resource_payload_key FROM {} \
             WHERE resource_type_id = ? AND logical_id = ?",
            self.table
        );
        let rows = self
            .rows(cql, query_values!(resource_type_id, logical_id.to_string()))
            .await?;
        rows.iter().map(row_key).collect()
    }

    async fn scan(
        &self,
        lower: i64,
        upper: Option<i64>,
        limit: Option<i32>,
    ) -> Result<Vec<TokenRow>, CqlError> {
        let mut cql = format!(
            "SELECT token(resource_type_id, logical_id) AS t, resource_type_id, logical_id, \
             version, resource_payload_key, written_at FROM {} \
             WHERE token(resource_type_id, logical_id) >= ?",
            self.table
        );
        let values = match (upper, limit) {
            (Some(upper), Some(limit)) => {
                cql.push_str(" AND token(resource_type_id, logical_id) < ? LIMIT ?");
                query_values!(lower, upper, limit)
            }
            (Some(upper), None) => {
                cql.push_str(" AND token(resource_type_id, logical_id) < ?");
                query_values!(lower, upper)
            }
            (None, Some(limit)) => {
                cql.push_str(" LIMIT ?");
                query_values!(lower, limit)
            }
            (None, None) => query_values!(lower),
        };

        let rows = self.rows(cql, values).await?;
        rows.iter().map(token_row).collect()
    }
}

fn token_row(row: &Row) -> Result<TokenRow, CqlError> {
    let token: i64 = row.get_r_by_name("t").map_err(map_driver_error)?;
    let written_at: Option<i64> = row.get_by_name("written_at").map_err(map_driver_error)?;
    Ok(TokenRow {
        token,
        key: row_key(row)?,
        written_at,
    })
}

fn map_driver_error(err: cdrs_tokio::error::Error) -> CqlError {
    match err {
        cdrs_tokio::error::Error::Io(err) => CqlError::Unavailable(err.to_string()),
        other => {
            let message = other.to_string();
            let lower = message.to_ascii_lowercase();
            if lower.contains("timeout") || lower.contains("timed out") {
                CqlError::Timeout(message)
            } else if lower.contains("overloaded") {
                CqlError::Overloaded(message)
            } else if lower.contains("unavailable") {
                CqlError::Unavailable(message)
            } else if lower.contains("syntax") || lower.contains("invalid") {
                CqlError::InvalidQuery(message)
            } else {
                CqlError::Internal(message)
            }
        }
    }
}

/// Maps node config errors and `SessionBuildError`s alike.
fn connection_error(err: impl fmt::Display) -> PayloadError {
    BackendError::ConnectionFailed {
        backend_name: "cassandra".to_string(),
        message: err.to_string(),
    }
    .into()
}
