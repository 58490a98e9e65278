//! Shared error types for the Engram substrate.
//!
//! Absence is not an error: lookups for missing rows return `Ok(None)` and
//! partial updates of missing rows return `Ok(false)`. The variants here
//! cover the failures that must reach the caller.

use thiserror::Error;

/// Top-level error type for the Engram substrate.
#[derive(Error, Debug)]
pub enum EngramError {
    /// An insert collided with an existing primary key.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Input failed validation (unknown correlation type, bad enum string).
    #[error("Validation failure: {0}")]
    Validation(String),

    /// The underlying storage engine reported an I/O or statement error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A schema migration failed. Fatal at startup; the store must not be
    /// used with a partially migrated schema.
    #[error("Migration failed: {filename}: {reason}")]
    Migration {
        /// The migration script that failed.
        filename: String,
        /// Why it failed.
        reason: String,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The secrets pipeline failed to encapsulate or decapsulate a value.
    #[error("Secrets error: {0}")]
    Secrets(String),

    /// The memory operation was denied.
    #[error("Denied: {0}")]
    Denied(String),

    /// A dual-write completed one physical write but not the other.
    ///
    /// When `node_persisted` is true the graph node is visible to `recall`
    /// but the event is absent from time-series queries; callers reconcile
    /// or retry.
    #[error("Partial write (node persisted: {node_persisted}): {reason}")]
    PartialWrite {
        /// Whether the graph-node half of the write committed.
        node_persisted: bool,
        /// The failure that stopped the second write.
        reason: String,
    },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred (poisoned lock, invariant breach).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with EngramError.
pub type EngramResult<T> = Result<T, EngramError>;
