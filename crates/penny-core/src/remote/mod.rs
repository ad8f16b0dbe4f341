//! Remote document store
//!
//! The sync layer talks to the backend through the [`RemoteStore`] port so
//! the queue engine and data service never know whether they are pushing to
//! an HTTP API or an in-memory fake. Failures are classified so callers can
//! tell a retryable outage from a permanent denial.

mod http;
mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

/// Remote operation failures, split by how the caller should react.
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    /// The backend could not be reached; the operation should be retried
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the caller's credentials; retrying cannot help
    #[error("Permission denied by remote")]
    PermissionDenied,

    /// The backend answered but refused the operation
    #[error("Remote operation failed: {0}")]
    Failed(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// A change observed on the remote, pushed to subscribers.
#[derive(Debug, Clone)]
pub struct RemoteChange {
    pub collection: String,
    pub id: String,
    /// `None` means the document was deleted remotely
    pub body: Option<Value>,
}

/// Backend document storage, one namespace per collection.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or replace a document on the remote.
    async fn save_document(&self, collection: &str, id: &str, body: &Value) -> RemoteResult<()>;

    /// Remove a document from the remote.
    async fn delete_document(&self, collection: &str, id: &str) -> RemoteResult<()>;

    /// All documents in a collection, newest `updated_at` first.
    async fn fetch_all(&self, collection: &str) -> RemoteResult<Vec<Value>>;

    /// Documents whose `updated_at` is at or after `since_ms`.
    async fn fetch_recent(&self, collection: &str, since_ms: i64) -> RemoteResult<Vec<Value>>;

    /// Subscribe to changes observed on the remote.
    fn subscribe(&self) -> broadcast::Receiver<RemoteChange>;
}
