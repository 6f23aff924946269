use async_trait::async_trait;

use crate::error::{BackendError, PayloadError};

/// Name of the payload table inside each datastore keyspace.
pub const PAYLOAD_TABLE: &str = "resource_payloads";

/// Primary key of one payload row.
///
/// The partition key is `(resource_type_id, logical_id)`; `version` and
/// `payload_key` are clustering columns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PayloadRowKey {
    /// Numeric resource type.
    pub resource_type_id: i32,
    /// Logical id of the resource.
    pub logical_id: String,
    /// Resource version.
    pub version: i32,
    /// Content key of the payload.
    pub payload_key: String,
}

/// A full payload row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRow {
    /// Primary key.
    pub key: PayloadRowKey,
    /// Encoded payload bytes.
    pub payload: Vec<u8>,
    /// Write time in milliseconds since the epoch.
    pub written_at: i64,
}

/// A row returned by a token-range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRow {
    /// Murmur3 token of the row's partition key.
    pub token: i64,
    /// Primary key.
    pub key: PayloadRowKey,
    /// Write time in milliseconds since the epoch, when selected.
    pub written_at: Option<i64>,
}

/// Driver failures, classified by how the caller should react.
#[derive(Debug, Clone)]
pub enum CqlError {
    /// Not enough replicas, or no connection to the cluster.
    Unavailable(String),
    /// Read or write timed out.
    Timeout(String),
    /// The coordinator shed the request.
    Overloaded(String),
    /// The statement was rejected; retrying will not help.
    InvalidQuery(String),
    /// Anything else.
    Internal(String),
}

/// The queries the payload store issues against one datastore keyspace.
#[async_trait]
pub trait CqlApi: Send + Sync + std::fmt::Debug {
    /// Writes a row, overwriting any row with the same key.
    async fn insert(&self, row: PayloadRow) -> Result<(), CqlError>;

    /// Reads one row by its full primary key.
    async fn select(&self, key: &PayloadRowKey) -> Result<Option<PayloadRow>, CqlError>;

    /// `DELETE ... IF EXISTS`; returns whether the row existed.
    async fn delete(&self, key: &PayloadRowKey) -> Result<bool, CqlError>;

    /// Clustering keys of one partition, in clustering order.
    async fn list_partition(
        &self,
        resource_type_id: i32,
        logical_id: &str,
    ) -> Result<Vec<PayloadRowKey>, CqlError>;

    /// Rows with `lower <= token < upper` (`upper = None` is unbounded) in
    /// token order, at most `limit` of them when given.
    async fn scan(
        &self,
        lower: i64,
        upper: Option<i64>,
        limit: Option<i32>,
    ) -> Result<Vec<TokenRow>, CqlError>;
}

pub(crate) fn map_cql_error(err: CqlError) -> PayloadError {
    let backend_name = "cassandra".to_string();
    let err = match err {
        CqlError::Unavailable(message) => BackendError::Unavailable {
            backend_name,
            message,
        },
        CqlError::Timeout(message) => BackendError::Timeout {
            backend_name,
            message,
        },
        CqlError::Overloaded(message) => BackendError::Throttled {
            backend_name,
            message,
        },
        CqlError::InvalidQuery(message) => BackendError::configuration("cassandra", message),
        CqlError::Internal(message) => BackendError::internal("cassandra", message),
    };
    err.into()
}
