use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{BackendError, PayloadError};

/// Object attributes returned by `HEAD` and `PUT`.
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    /// Entity tag, quotes included.
    pub etag: Option<String>,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
    /// Object size in bytes.
    pub size: i64,
}

/// An object body with its attributes.
#[derive(Debug, Clone)]
pub struct ObjectData {
    /// Object body.
    pub bytes: Vec<u8>,
    /// Object attributes.
    pub metadata: ObjectMetadata,
}

/// One entry of a listing.
#[derive(Debug, Clone)]
pub struct ListObjectItem {
    /// Full object key.
    pub key: String,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
    /// Object size in bytes.
    pub size: i64,
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct ListObjectsResult {
    /// Entries in key order.
    pub items: Vec<ListObjectItem>,
    /// Token for the next page; `None` on the last page.
    pub next_continuation_token: Option<String>,
}

/// Listing request. Keys come back in ascending UTF-8 byte order.
#[derive(Debug, Clone, Copy)]
pub struct ListRequest<'a> {
    /// Only keys starting with this prefix are returned.
    pub prefix: &'a str,
    /// Only keys strictly greater than this one are returned.
    pub start_after: Option<&'a str>,
    /// Continuation token from the previous page.
    pub continuation: Option<&'a str>,
    /// Page size cap.
    pub max_keys: Option<i32>,
}

/// Object-storage failures, classified by how the caller should react.
#[derive(Debug, Clone)]
pub enum S3ClientError {
    /// The bucket or object does not exist.
    NotFound,
    /// A conditional request did not match.
    PreconditionFailed,
    /// The service asked us to slow down.
    Throttled(String),
    /// The service could not be reached.
    Unavailable(String),
    /// The request was rejected; retrying will not help.
    InvalidInput(String),
    /// Anything else.
    Internal(String),
}

/// The object-storage operations the payload store needs.
#[async_trait]
pub trait S3Api: Send + Sync + std::fmt::Debug {
    /// Checks that the bucket exists and is reachable.
    async fn head_bucket(&self, bucket: &str) -> Result<(), S3ClientError>;

    /// Object attributes; `None` when the object does not exist.
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, S3ClientError>;

    /// Object body and attributes; `None` when the object does not exist.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectData>, S3ClientError>;

    /// Writes an object, replacing any existing one.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<ObjectMetadata, S3ClientError>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ClientError>;

    /// Lists one page of keys.
    async fn list_objects(
        &self,
        bucket: &str,
        request: ListRequest<'_>,
    ) -> Result<ListObjectsResult, S3ClientError>;
}

/// Maps a client error to the payload error taxonomy. `key` names the
/// object the failed call targeted.
pub(crate) fn map_client_error(err: S3ClientError, key: &str) -> PayloadError {
    match err {
        S3ClientError::NotFound => PayloadError::NotFound {
            address: key.to_string(),
        },
        S3ClientError::PreconditionFailed => PayloadError::Conflict {
            address: key.to_string(),
            message: "object precondition failed".to_string(),
        },
        S3ClientError::Throttled(message) => PayloadError::Backend(BackendError::Throttled {
            backend_name: "s3".to_string(),
            message,
        }),
        S3ClientError::Unavailable(message) => PayloadError::Backend(BackendError::Unavailable {
            backend_name: "s3".to_string(),
            message,
        }),
        S3ClientError::InvalidInput(message) => {
            PayloadError::Backend(BackendError::configuration("s3", message))
        }
        S3ClientError::Internal(message) => {
            PayloadError::Backend(BackendError::internal("s3", message))
        }
    }
}
