//! In-memory remote store for tests and local-only operation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::remote::{RemoteChange, RemoteError, RemoteResult, RemoteStore};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// In-memory [`RemoteStore`] with fault injection.
///
/// Behaves like a well-behaved backend by default; tests flip it into
/// unavailable or permission-denied mode, or inject a bounded number of
/// one-shot failures, to exercise retry and drop paths.
#[derive(Clone)]
pub struct MemoryRemoteStore {
    documents: Arc<Mutex<HashMap<(String, String), Value>>>,
    unavailable: Arc<AtomicBool>,
    permission_denied: Arc<AtomicBool>,
    fail_next: Arc<AtomicUsize>,
    changes: broadcast::Sender<RemoteChange>,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            documents: Arc::new(Mutex::new(HashMap::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
            permission_denied: Arc::new(AtomicBool::new(false)),
            fail_next: Arc::new(AtomicUsize::new(0)),
            changes,
        }
    }

    /// While set, every operation fails with [`RemoteError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// While set, every operation fails with [`RemoteError::PermissionDenied`].
    pub fn set_permission_denied(&self, denied: bool) {
        self.permission_denied.store(denied, Ordering::SeqCst);
    }

    /// Fail the next `count` operations with [`RemoteError::Unavailable`],
    /// then recover.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Seed a document directly, bypassing fault injection.
    pub fn seed(&self, collection: &str, id: &str, body: Value) {
        self.documents
            .lock()
            .unwrap()
            .insert((collection.to_string(), id.to_string()), body);
    }

    #[must_use]
    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.documents
            .lock()
            .unwrap()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_faults(&self) -> RemoteResult<()> {
        if self.permission_denied.load(Ordering::SeqCst) {
            return Err(RemoteError::PermissionDenied);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("remote offline".to_string()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RemoteError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn sorted(&self, mut documents: Vec<Value>) -> Vec<Value> {
        documents.sort_by_key(|doc| {
            std::cmp::Reverse(doc.get("updated_at").and_then(Value::as_i64).unwrap_or(0))
        });
        documents
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn save_document(&self, collection: &str, id: &str, body: &Value) -> RemoteResult<()> {
        self.check_faults()?;
        self.seed(collection, id, body.clone());
        let _ = self.changes.send(RemoteChange {
            collection: collection.to_string(),
            id: id.to_string(),
            body: Some(body.clone()),
        });
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.check_faults()?;
        self.documents
            .lock()
            .unwrap()
            .remove(&(collection.to_string(), id.to_string()));
        let _ = self.changes.send(RemoteChange {
            collection: collection.to_string(),
            id: id.to_string(),
            body: None,
        });
        Ok(())
    }

    async fn fetch_all(&self, collection: &str) -> RemoteResult<Vec<Value>> {
        self.check_faults()?;
        let documents: Vec<Value> = self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|((coll, _), _)| coll == collection)
            .map(|(_, body)| body.clone())
            .collect();
        Ok(self.sorted(documents))
    }

    async fn fetch_recent(&self, collection: &str, since_ms: i64) -> RemoteResult<Vec<Value>> {
        let documents = self.fetch_all(collection).await?;
        Ok(documents
            .into_iter()
            .filter(|doc| doc.get("updated_at").and_then(Value::as_i64).unwrap_or(0) >= since_ms)
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fail_next_recovers() {
        let remote = MemoryRemoteStore::new();
        remote.fail_next(2);

        let body = json!({"id": "a"});
        assert!(remote.save_document("goals", "a", &body).await.is_err());
        assert!(remote.save_document("goals", "a", &body).await.is_err());
        assert!(remote.save_document("goals", "a", &body).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_recent_filters_and_orders() {
        let remote = MemoryRemoteStore::new();
        remote.seed("transactions", "a", json!({"id": "a", "updated_at": 100}));
        remote.seed("transactions", "b", json!({"id": "b", "updated_at": 300}));
        remote.seed("transactions", "c", json!({"id": "c", "updated_at": 200}));

        let recent = remote.fetch_recent("transactions", 200).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_subscribe_sees_saves_and_deletes() {
        let remote = MemoryRemoteStore::new();
        let mut changes = remote.subscribe();

        remote
            .save_document("budgets", "b1", &json!({"id": "b1"}))
            .await
            .unwrap();
        remote.delete_document("budgets", "b1").await.unwrap();

        let saved = changes.recv().await.unwrap();
        assert_eq!(saved.id, "b1");
        assert!(saved.body.is_some());

        let deleted = changes.recv().await.unwrap();
        assert!(deleted.body.is_none());
    }
}
