// src/core/errors.rs

//! Defines the primary error type for the entire crate.

use thiserror::Error;

/// The main error enum, representing all possible failures within the driver.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TailviewError {
    /// A programming invariant was violated. These are raised as close to the
    /// offending mutation as possible to aid debugging, and are always fatal
    /// to the driver that raised them.
    #[error("Internal invariant violation: {0}")]
    Internal(String),

    /// The oplog delivered an operation kind the driver does not understand.
    #[error("Unsupported oplog operation: {0}")]
    UnsupportedOplogEntry(String),

    /// Ordered observation is not implemented by this driver.
    #[error("Oplog observation only supports unordered callbacks")]
    OrderedObserveUnsupported,

    /// The field projection uses an operator the driver cannot tail through.
    /// The admissibility check treats this class of error as "not supported
    /// by oplog" rather than as a failure.
    #[error("Unsupported projection: {0}")]
    UnsupportedProjection(String),

    /// The selector could not be compiled.
    #[error("Bad selector: {0}")]
    BadSelector(String),

    /// The update modifier could not be parsed or applied.
    #[error("Bad modifier: {0}")]
    BadModifier(String),

    /// A point fetch issued while resolving an ambiguous update failed.
    /// Carries the first error observed in the batch.
    #[error("Document fetch failed: {0}")]
    Fetch(String),

    /// The initial or poll query against the collection failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl From<serde_json::Error> for TailviewError {
    fn from(e: serde_json::Error) -> Self {
        TailviewError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
