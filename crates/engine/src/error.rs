//! Engine error types
//!
//! Every failure the engine surfaces falls into one of five categories
//! (`ErrorKind`), plus `Config` for problems loading configuration before
//! any request runs. Driver failures are wrapped, never swallowed, except
//! for fire-and-forget writes where the caller opted out of reporting.

use mantle_core::{Key, KeyError};
use mantle_storage::StoreError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed entity or key on the way in
    Encode,
    /// Malformed stored record, key or token on the way out
    Decode,
    /// Query violates filter/sort/ancestor/projection rules
    BadQuery,
    /// Cursor does not belong to the query it was replayed against
    InvalidCursor,
    /// Id allocation failed
    Allocation,
    /// Document-store failure
    Storage,
    /// Configuration could not be loaded
    Config,
}

/// A per-entity write failure inside a batch
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFailure {
    /// Position of the entity in the batch
    pub index: usize,
    /// Key the write was addressed to
    pub key: Key,
    /// Driver error
    pub error: StoreError,
}

/// Engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Entity or key cannot be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Stored record, key or token cannot be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Query is not valid
    #[error("Bad query: {0}")]
    BadQuery(String),

    /// Cursor cannot be applied to this query
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Id allocation failed
    #[error("Allocation error: {0}")]
    Allocation(String),

    /// Underlying document-store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Some entities of a batch write failed; the others were written
    #[error("Batch partially failed: {} of {} writes failed", .failures.len(), .completed.len() + .failures.len())]
    PartialBatch {
        /// Keys that were written
        completed: Vec<Key>,
        /// Writes that failed, in batch order
        failures: Vec<EntityFailure>,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<KeyError> for Error {
    fn from(e: KeyError) -> Self {
        Error::Encode(format!("invalid key: {}", e))
    }
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Encode(_) => ErrorKind::Encode,
            Error::Decode(_) => ErrorKind::Decode,
            Error::BadQuery(_) => ErrorKind::BadQuery,
            Error::InvalidCursor(_) => ErrorKind::InvalidCursor,
            Error::Allocation(_) => ErrorKind::Allocation,
            Error::Storage(_) | Error::PartialBatch { .. } => ErrorKind::Storage,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Stable reason code
    pub fn reason_code(&self) -> &'static str {
        match self {
            Error::Encode(_) => "encode_error",
            Error::Decode(_) => "decode_error",
            Error::BadQuery(_) => "bad_query",
            Error::InvalidCursor(_) => "invalid_cursor",
            Error::Allocation(_) => "allocation_error",
            Error::Storage(e) => e.reason_code(),
            Error::PartialBatch { .. } => "partial_batch",
            Error::Config(_) => "config_error",
        }
    }

    /// True when the wrapped driver error is safe to reissue as a read
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(e) if e.is_retryable())
    }

    pub(crate) fn encode(msg: impl Into<String>) -> Self {
        Error::Encode(msg.into())
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    pub(crate) fn bad_query(msg: impl Into<String>) -> Self {
        Error::BadQuery(msg.into())
    }

    pub(crate) fn invalid_cursor(msg: impl Into<String>) -> Self {
        Error::InvalidCursor(msg.into())
    }
}
