//! Error types for Chronicle core operations.
//!
//! Two failures are meaningful to the capture engine: a malformed change
//! snapshot handed over by the entity framework, and a failure reported by
//! the persistence collaborator. Both propagate to the caller untouched.

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Chronicle core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A raw change snapshot entry was not an `[old, new]` pair.
    #[error("Malformed change set for attribute `{attribute}`: {reason}")]
    MalformedChangeSet {
        /// Attribute whose change entry is malformed.
        attribute: String,
        /// What was wrong with the entry.
        reason: String,
    },

    /// The persistence collaborator failed to store or query records.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A configuration document could not be parsed.
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Reason the configuration is invalid.
        reason: String,
    },
}

/// Errors reported by an audit store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The store cannot currently accept or serve records.
    #[error("Audit store unavailable: {0}")]
    Unavailable(String),

    /// Backend-specific error
    #[error("Audit store error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Failed to serialize audit record: {0}")]
    Serialization(#[from] serde_json::Error),
}
