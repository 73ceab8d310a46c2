// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

use thiserror::Error;

/// Error types for Lattice runtime operations
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Module model construction failed (invalid metadata, duplicate
    /// identifiers, ambiguous annotations). Fatal at construction time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A publication store create/update/delete failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// An in-process event listener returned an error. The publication
    /// stays incomplete and is retried by the supervisor.
    #[error("Listener error: {0}")]
    Listener(String),

    /// An external send completed exceptionally. Treated like a listener
    /// failure: the publication stays incomplete.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The distributed resubmission lock could not be acquired in time
    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    /// A routing expression failed to evaluate or produced no value
    #[error("Expression error: {0}")]
    Expression(String),

    /// Event serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid value for an identifier or routing target
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The requested publication does not exist in the store
    #[error("Unknown publication: {0}")]
    UnknownPublication(String),
}

/// Result type for Lattice runtime operations
pub type Result<T> = std::result::Result<T, Error>;
