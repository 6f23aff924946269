//! Error types for the payload layer.
//!
//! Every failure surfaced by a payload store, the scanner, the checkpoint
//! tracker or the reconciliation engine is a [`PayloadError`]. Callers branch
//! on [`PayloadError::kind`] rather than on which backend produced the error.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::core::ScanCursor;

/// The primary error type for all payload operations.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// Malformed payload address or path.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A payload that the caller required to exist is absent.
    #[error("payload not found: {address}")]
    NotFound { address: String },

    /// Optimistic-concurrency precondition failed on write.
    #[error("payload conflict at {address}: {message}")]
    Conflict { address: String, message: String },

    /// Backend transport, driver or serialization failure.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Programming error; never retried.
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// A scan page could not be fetched; aborts the reconciliation run.
    #[error("failed to fetch scan page starting at {cursor}: {source}")]
    ScanPage {
        cursor: ScanCursor,
        #[source]
        source: Box<PayloadError>,
    },

    /// The reconciliation check or delete of one record failed.
    #[error("reconciliation check failed for {address}: {source}")]
    RecordCheck {
        address: String,
        #[source]
        source: Box<PayloadError>,
    },
}

/// Classification of a [`PayloadError`].
///
/// This is the data callers use to decide between retrying, treating a
/// payload as absent, re-reading before a write, or giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed address; never retried.
    Format,
    /// The targeted object does not exist.
    NotFound,
    /// Version precondition failed; requires a fresh read-modify-write.
    Conflict,
    /// Backend unreachable, timed out or throttled; safe to retry.
    TransientIo,
    /// Non-retryable backend failure.
    Fatal,
    /// Programming error.
    InvariantViolation,
    /// Page fetch failed during reconciliation.
    ScanPageFailure,
    /// Single record check or delete failed during reconciliation.
    PerRecordCheckFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Format => "format",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TransientIo => "transient-io",
            ErrorKind::Fatal => "fatal",
            ErrorKind::InvariantViolation => "invariant-violation",
            ErrorKind::ScanPageFailure => "scan-page-failure",
            ErrorKind::PerRecordCheckFailure => "per-record-check-failure",
        };
        write!(f, "{}", name)
    }
}

/// Errors raised while parsing a payload path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The path does not have exactly four segments.
    #[error("malformed payload path '{path}': expected 4 segments, found {segments}")]
    SegmentCount { path: String, segments: usize },

    /// A segment is empty.
    #[error("malformed payload path '{path}': empty {field}")]
    EmptySegment { path: String, field: &'static str },

    /// A numeric segment is not a positive integer.
    #[error("malformed payload path '{path}': {field} '{value}' is not a positive integer")]
    NotPositive {
        path: String,
        field: &'static str,
        value: String,
    },

    /// A free-text field contains the path delimiter.
    #[error("invalid payload {field} '{value}': must not contain '/'")]
    ContainsDelimiter { field: &'static str, value: String },
}

/// Errors originating from a payload backend or its configuration.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unreachable.
    #[error("backend unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// The backend did not answer in time.
    #[error("backend {backend_name} timed out: {message}")]
    Timeout {
        backend_name: String,
        message: String,
    },

    /// The backend is shedding load.
    #[error("backend {backend_name} throttled the request: {message}")]
    Throttled {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Invalid backend settings.
    #[error("invalid {backend_name} configuration: {message}")]
    Configuration {
        backend_name: String,
        message: String,
    },

    /// The requested backend is not compiled into this build.
    #[error("backend '{backend_name}' is not enabled in this build (feature '{feature}')")]
    NotEnabled {
        backend_name: String,
        feature: &'static str,
    },

    /// Payload encoding or decoding error.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Programming errors detected at runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Tracker ids must be submitted in strictly increasing order.
    #[error("request id {id} tracked out of order (last tracked id is {last})")]
    TrackOutOfOrder { id: u64, last: u64 },

    /// `completed` was called while nothing was queued.
    #[error("request id {id} completed but no request ids are queued")]
    CompletedWithEmptyQueue { id: u64 },

    /// `completed` was called for an id that is not outstanding.
    #[error("request id {id} completed but it is not an outstanding tracked id")]
    CompletedUnknown { id: u64 },

    /// A backend returned a page that breaks the scan contract.
    #[error("scan contract violated: {message}")]
    ScanContract { message: String },

    /// A transaction journal was used after it was closed or misused.
    #[error("payload journal misuse: {message}")]
    Journal { message: String },
}

impl PayloadError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PayloadError::Format(_) => ErrorKind::Format,
            PayloadError::NotFound { .. } => ErrorKind::NotFound,
            PayloadError::Conflict { .. } => ErrorKind::Conflict,
            PayloadError::Backend(err) => err.kind(),
            PayloadError::Invariant(_) => ErrorKind::InvariantViolation,
            PayloadError::ScanPage { .. } => ErrorKind::ScanPageFailure,
            PayloadError::RecordCheck { .. } => ErrorKind::PerRecordCheckFailure,
        }
    }

    /// Returns true if the operation may be retried with backoff.
    ///
    /// Retrying a store is only safe because writes are idempotent per
    /// payload key.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientIo
    }

    /// Wraps a page-fetch failure so it aborts a reconciliation run.
    pub fn scan_page(cursor: ScanCursor, source: PayloadError) -> Self {
        PayloadError::ScanPage {
            cursor,
            source: Box::new(source),
        }
    }

    /// Wraps a failure of one record's reconciliation check.
    pub fn record_check(address: impl fmt::Display, source: PayloadError) -> Self {
        PayloadError::RecordCheck {
            address: address.to_string(),
            source: Box::new(source),
        }
    }
}

impl BackendError {
    /// Returns the classification of this backend error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Unavailable { .. }
            | BackendError::Timeout { .. }
            | BackendError::Throttled { .. }
            | BackendError::ConnectionFailed { .. } => ErrorKind::TransientIo,
            BackendError::Configuration { .. }
            | BackendError::NotEnabled { .. }
            | BackendError::Serialization { .. }
            | BackendError::Internal { .. } => ErrorKind::Fatal,
        }
    }

    /// Builds an [`BackendError::Internal`] without a source error.
    pub fn internal(backend_name: &str, message: impl Into<String>) -> Self {
        BackendError::Internal {
            backend_name: backend_name.to_string(),
            message: message.into(),
            source: None,
        }
    }

    /// Builds a [`BackendError::Configuration`].
    pub fn configuration(backend_name: &str, message: impl Into<String>) -> Self {
        BackendError::Configuration {
            backend_name: backend_name.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for payload operations.
pub type PayloadResult<T> = Result<T, PayloadError>;

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::Backend(BackendError::Serialization {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PayloadError {
    fn from(err: rusqlite::Error) -> Self {
        PayloadError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for PayloadError {
    fn from(err: r2d2::Error) -> Self {
        PayloadError::Backend(BackendError::Unavailable {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
        })
    }
}
