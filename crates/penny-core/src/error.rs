//! Error types for penny-core

use thiserror::Error;

/// Result type alias using penny-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in penny-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Soft delete refused for a non-deletable collection
    #[error("Delete refused for non-deletable collection: {0}")]
    DeleteRefused(&'static str),

    /// Remote store error
    #[error("Remote error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    /// Vault encryption/decryption error
    #[error("Vault error: {0}")]
    Vault(#[from] crate::vault::VaultError),
}
