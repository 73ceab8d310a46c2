//! Error types for the PostgreSQL publication store

use thiserror::Error;

/// Errors that can occur when using the PostgreSQL publication store
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// PostgreSQL connection or query error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection establishment failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution failed
    #[error("Query error: {0}")]
    Query(String),

    /// Invalid SQL identifier (table name)
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Stored row carries a status the store does not know
    #[error("Unknown publication status: {0}")]
    UnknownStatus(String),

    /// Publication not found
    #[error("Publication not found: {0}")]
    NotFound(String),
}

/// Result type for PostgreSQL publication store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Convert PostgreSQL store errors to Lattice errors
impl From<Error> for lattice::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(id) => lattice::Error::UnknownPublication(id),
            other => lattice::Error::Storage(other.to_string()),
        }
    }
}
