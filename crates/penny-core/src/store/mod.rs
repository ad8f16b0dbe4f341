//! Local persistent document store
//!
//! The sync layer consumes local persistence through the [`LocalStore`]
//! port: keyed get/put/delete per collection plus a list-all. Single-record
//! atomicity is all that is required. The shipped implementation is a
//! libSQL-backed document table.

mod libsql_store;
mod migrations;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use libsql_store::LibSqlStore;

/// Internal collection holding tombstones, keyed `collection:id`.
pub const TOMBSTONES: &str = "_tombstones";
/// Internal collection holding sync bookkeeping (last-sync timestamps).
pub const SYNC_META: &str = "_sync_meta";

/// Keyed local document storage, one namespace per collection.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Fetch a document by id, `None` if absent.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Insert or replace a document.
    async fn put(&self, collection: &str, id: &str, body: &Value) -> Result<()>;

    /// Remove a document. Removing an absent document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// All documents in a collection, newest `updated_at` first.
    async fn list(&self, collection: &str) -> Result<Vec<Value>>;
}
