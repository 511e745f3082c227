//! Document-store driver errors

use thiserror::Error;

/// Result type for driver operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by a `DocumentStore` driver
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Connection to the store failed or was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation exceeded the driver's deadline
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The store could not satisfy the requested write concern
    #[error("write concern failed: {0}")]
    WriteConcern(String),

    /// Insert of a document whose `_id` already exists
    #[error("duplicate key {id} in {collection}")]
    DuplicateKey {
        /// Collection name
        collection: String,
        /// Conflicting `_id`
        id: String,
    },

    /// Document rejected by the store (bad field name, missing `_id`)
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A counter increment would overflow
    #[error("counter {id} in {collection} overflowed")]
    CounterOverflow {
        /// Collection name
        collection: String,
        /// Counter `_id`
        id: String,
    },

    /// Temporary condition; the same read may succeed if reissued
    #[error("transient error: {0}")]
    Transient(String),
}

impl StoreError {
    /// True when the driver documents the failed operation as safe to reissue
    ///
    /// Only `Transient` qualifies. Callers must still restrict retries to
    /// idempotent reads.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Stable reason code
    pub fn reason_code(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "connection",
            StoreError::Timeout(_) => "timeout",
            StoreError::WriteConcern(_) => "write_concern",
            StoreError::DuplicateKey { .. } => "duplicate_key",
            StoreError::InvalidDocument(_) => "invalid_document",
            StoreError::CounterOverflow { .. } => "counter_overflow",
            StoreError::Transient(_) => "transient",
        }
    }
}
