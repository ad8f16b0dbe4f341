//! libSQL-backed document store

use std::path::Path;

use async_trait::async_trait;
use libsql::{params, Builder, Connection};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::{migrations, LocalStore};

/// Document store over a single libSQL database.
///
/// Documents are JSON bodies in one table keyed by `(collection, id)`, with
/// `updated_at` denormalized for ordered listing. `Connection` is cheap to
/// clone, so the store is too.
#[derive(Clone)]
pub struct LibSqlStore {
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a database at the given path and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Database("Invalid database path".to_string()))?;

        let db = Builder::new_local(path_str).build().await?;
        let conn = db.connect()?;

        configure(&conn).await?;
        migrations::run(&conn).await?;

        tracing::debug!("Opened local store at {}", path.display());
        Ok(Self { conn })
    }

    /// Open an in-memory database, mainly for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }
}

/// Durability and performance pragmas for on-disk databases.
async fn configure(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();
    conn.execute("PRAGMA synchronous = NORMAL;", ()).await.ok();
    conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
    conn.execute("PRAGMA cache_size = 10000;", ()).await.ok();
    Ok(())
}

/// Pull the merge timestamp out of a document body, treating an absent or
/// malformed one as 0 so the record orders before everything stamped.
fn body_updated_at(body: &Value) -> i64 {
    body.get("updated_at").and_then(Value::as_i64).unwrap_or(0)
}

#[async_trait]
impl LocalStore for LibSqlStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT body FROM documents WHERE collection = ? AND id = ?",
                params![collection, id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let body: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, collection: &str, id: &str, body: &Value) -> Result<()> {
        let serialized = serde_json::to_string(body)?;
        let updated_at = body_updated_at(body);

        self.conn
            .execute(
                "INSERT INTO documents (collection, id, body, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (collection, id)
                 DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![collection, id, serialized, updated_at],
            )
            .await?;

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM documents WHERE collection = ? AND id = ?",
                params![collection, id],
            )
            .await?;

        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT body FROM documents WHERE collection = ? ORDER BY updated_at DESC",
                params![collection],
            )
            .await?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            let body: String = row.get(0)?;
            documents.push(serde_json::from_str(&body)?);
        }

        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_get_roundtrip() {
        let store = LibSqlStore::open_in_memory().await.unwrap();

        let body = json!({"id": "t1", "amount_cents": 1250, "updated_at": 42});
        store.put("transactions", "t1", &body).await.unwrap();

        let fetched = store.get("transactions", "t1").await.unwrap();
        assert_eq!(fetched, Some(body));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_replaces_existing() {
        let store = LibSqlStore::open_in_memory().await.unwrap();

        store
            .put("budgets", "b1", &json!({"id": "b1", "limit_cents": 100}))
            .await
            .unwrap();
        store
            .put("budgets", "b1", &json!({"id": "b1", "limit_cents": 200}))
            .await
            .unwrap();

        let fetched = store.get("budgets", "b1").await.unwrap().unwrap();
        assert_eq!(fetched["limit_cents"], 200);
        assert_eq!(store.list("budgets").await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_collections_are_isolated() {
        let store = LibSqlStore::open_in_memory().await.unwrap();

        store
            .put("goals", "shared-id", &json!({"id": "shared-id"}))
            .await
            .unwrap();

        assert!(store.get("trips", "shared-id").await.unwrap().is_none());
        assert!(store.get("goals", "shared-id").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_is_idempotent() {
        let store = LibSqlStore::open_in_memory().await.unwrap();

        store.put("trips", "tr1", &json!({"id": "tr1"})).await.unwrap();
        store.delete("trips", "tr1").await.unwrap();
        store.delete("trips", "tr1").await.unwrap();

        assert!(store.get("trips", "tr1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("penny.db");

        {
            let store = LibSqlStore::open(&path).await.unwrap();
            store
                .put("goals", "g1", &json!({"id": "g1", "updated_at": 5}))
                .await
                .unwrap();
        }

        let reopened = LibSqlStore::open(&path).await.unwrap();
        assert!(reopened.get("goals", "g1").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_orders_newest_first() {
        let store = LibSqlStore::open_in_memory().await.unwrap();

        store
            .put("transactions", "old", &json!({"id": "old", "updated_at": 10}))
            .await
            .unwrap();
        store
            .put("transactions", "new", &json!({"id": "new", "updated_at": 30}))
            .await
            .unwrap();
        store
            .put("transactions", "unstamped", &json!({"id": "unstamped"}))
            .await
            .unwrap();

        let listed = store.list("transactions").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|doc| doc["id"].as_str().unwrap()).collect();

        assert_eq!(ids, vec!["new", "old", "unstamped"]);
    }
}
