//! HTTP-backed remote store

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::remote::{RemoteChange, RemoteError, RemoteResult, RemoteStore};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Remote store speaking JSON over HTTP.
///
/// Documents live under `{base}/collections/{collection}/documents/{id}`.
/// Remote change notifications are produced by polling `fetch_recent` on a
/// fixed cadence and fanning results out over a broadcast channel.
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    changes: broadcast::Sender<RemoteChange>,
}

impl HttpRemoteStore {
    pub fn new(endpoint: &str, api_key: Option<String>) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Failed(format!("Failed to build HTTP client: {e}")))?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url: normalize_endpoint(endpoint),
            api_key: api_key.filter(|key| !key.is_empty()),
            changes,
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/collections/{collection}/documents/{id}", self.base_url)
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{collection}/documents", self.base_url)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn fetch(&self, url: String) -> RemoteResult<Vec<Value>> {
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(parse_api_error(response).await);
        }

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| RemoteError::Failed(format!("Malformed response body: {e}")))
    }

    /// Poll the given collections every `interval`, broadcasting documents
    /// that changed since the previous poll. Runs until the returned handle
    /// is dropped or aborted.
    pub fn spawn_polling(
        &self,
        collections: Vec<String>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut since_ms = chrono::Utc::now().timestamp_millis();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let poll_started = chrono::Utc::now().timestamp_millis();

                for collection in &collections {
                    match store.fetch_recent(collection, since_ms).await {
                        Ok(documents) => {
                            for body in documents {
                                let Some(id) = body.get("id").and_then(Value::as_str) else {
                                    continue;
                                };
                                let _ = store.changes.send(RemoteChange {
                                    collection: collection.clone(),
                                    id: id.to_string(),
                                    body: Some(body.clone()),
                                });
                            }
                        }
                        Err(e) => {
                            tracing::debug!("Change poll for {collection} failed: {e}");
                        }
                    }
                }

                since_ms = poll_started;
            }
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn save_document(&self, collection: &str, id: &str, body: &Value) -> RemoteResult<()> {
        let response = self
            .request(self.client.put(self.document_url(collection, id)))
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(parse_api_error(response).await);
        }

        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> RemoteResult<()> {
        let response = self
            .request(self.client.delete(self.document_url(collection, id)))
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        // A document already gone on the remote is success for our purposes
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }

        if !response.status().is_success() {
            return Err(parse_api_error(response).await);
        }

        Ok(())
    }

    async fn fetch_all(&self, collection: &str) -> RemoteResult<Vec<Value>> {
        self.fetch(self.collection_url(collection)).await
    }

    async fn fetch_recent(&self, collection: &str, since_ms: i64) -> RemoteResult<Vec<Value>> {
        self.fetch(format!("{}?since={since_ms}", self.collection_url(collection)))
            .await
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
        self.changes.subscribe()
    }
}

/// Trim trailing slashes so URL joins stay predictable.
fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Map an error response to the retry classification callers act on.
async fn parse_api_error(response: reqwest::Response) -> RemoteError {
    let status = response.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return RemoteError::PermissionDenied;
    }

    let detail = response
        .text()
        .await
        .ok()
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| status.to_string());

    if status.is_server_error() {
        RemoteError::Unavailable(detail)
    } else {
        RemoteError::Failed(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("https://api.example.com/"),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_endpoint("https://api.example.com"),
            "https://api.example.com"
        );
    }

    #[test]
    fn test_document_url_shape() {
        let store = HttpRemoteStore::new("https://api.example.com/", None).unwrap();
        assert_eq!(
            store.document_url("transactions", "t1"),
            "https://api.example.com/collections/transactions/documents/t1"
        );
    }

    #[test]
    fn test_empty_api_key_means_unauthenticated() {
        let store = HttpRemoteStore::new("https://api.example.com", Some(String::new())).unwrap();
        assert!(store.api_key.is_none());
    }
}
