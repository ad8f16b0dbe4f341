//! Soft-delete lifecycle
//!
//! Deletions become retained tombstone records instead of disappearing
//! outright. A tombstone supports restore within its retention window,
//! suppresses resurrection of the deleted record during merges, and is
//! discarded irreversibly once the window elapses. Tombstones persist in a
//! dedicated local collection keyed `collection:id` and are uploaded
//! through the sync queue so other devices observe the deletion.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::{Collection, DomainRecord, SyncTier, TombstoneRecord};
use crate::queue::SyncQueueEngine;
use crate::registry::{CollectionRegistry, RetentionPolicy};
use crate::store::{LocalStore, TOMBSTONES};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Manages tombstones: creation on soft delete, restore, cross-device
/// merge, and permanent-expiry cleanup.
#[derive(Clone)]
pub struct TombstoneService {
    local: Arc<dyn LocalStore>,
    queue: SyncQueueEngine,
    registry: Arc<CollectionRegistry>,
    device_id: String,
}

impl TombstoneService {
    #[must_use]
    pub fn new(
        local: Arc<dyn LocalStore>,
        queue: SyncQueueEngine,
        registry: Arc<CollectionRegistry>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            local,
            queue,
            registry,
            device_id: device_id.into(),
        }
    }

    /// Capture a record into a tombstone before it is deleted.
    ///
    /// Returns `Ok(false)` without touching anything when the collection is
    /// non-deletable; such records must never silently disappear.
    pub async fn soft_delete(&self, record: &DomainRecord) -> Result<bool> {
        let collection = record.collection();
        let retention_days = match self.registry.retention(collection) {
            RetentionPolicy::NonDeletable => {
                tracing::warn!(
                    collection = collection.as_str(),
                    id = record.id(),
                    "Soft delete refused for non-deletable collection"
                );
                return Ok(false);
            }
            RetentionPolicy::Days(days) => days,
        };

        let tombstone = TombstoneRecord::new(
            collection,
            record.id(),
            serde_json::to_value(record)?,
            self.device_id.clone(),
            retention_days,
        );

        self.persist(&tombstone).await?;
        self.queue
            .enqueue_tombstone(tombstone, self.registry.tier(collection))
            .await;

        Ok(true)
    }

    /// Bring a soft-deleted record back.
    ///
    /// Returns `None` if no matching un-restored tombstone exists or its
    /// retention window has already elapsed (the expired tombstone is left
    /// for the cleanup sweep). On success the captured record is written
    /// back to the local store and re-enqueued at High tier for re-upload.
    pub async fn restore(&self, collection: Collection, id: &str) -> Result<Option<DomainRecord>> {
        let Some(mut tombstone) = self.fetch(collection, id).await? else {
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp_millis();
        if !tombstone.is_active() || tombstone.is_expired(now) {
            return Ok(None);
        }

        let record: DomainRecord = serde_json::from_value(tombstone.data.clone())?;

        tombstone.restored = true;
        tombstone.restored_at = Some(now);
        self.persist(&tombstone).await?;

        self.local
            .put(collection.as_str(), id, &serde_json::to_value(&record)?)
            .await?;
        self.queue
            .enqueue_save_with_tier(record.clone(), SyncTier::High)
            .await;

        tracing::info!(collection = collection.as_str(), id, "Restored soft-deleted record");
        Ok(Some(record))
    }

    /// Tombstones of a collection that are still restorable.
    pub async fn deleted_items(&self, collection: Collection) -> Result<Vec<TombstoneRecord>> {
        let now = chrono::Utc::now().timestamp_millis();
        let all = self.all_tombstones().await?;
        Ok(all
            .into_iter()
            .filter(|t| t.collection == collection && t.is_active() && !t.is_expired(now))
            .collect())
    }

    /// Whether an active tombstone shadows this record. Merges consult this
    /// so a record deleted on one device is not resurrected by another
    /// device's stale copy.
    pub async fn is_tombstoned(&self, collection: Collection, id: &str) -> Result<bool> {
        Ok(self
            .fetch(collection, id)
            .await?
            .is_some_and(|t| t.is_active()))
    }

    /// Fold tombstones observed from other devices into local state.
    ///
    /// Keyed by `(collection, id)`; whichever of the local and remote
    /// tombstone has the later `deleted_at` wins. Merging the same list
    /// twice leaves state unchanged. Returns how many were adopted.
    pub async fn merge_cloud_tombstones(&self, remote: Vec<TombstoneRecord>) -> Result<usize> {
        let mut adopted = 0;
        for incoming in remote {
            let keep = match self.fetch(incoming.collection, &incoming.id).await? {
                Some(existing) => incoming.deleted_at > existing.deleted_at,
                None => true,
            };
            if keep {
                self.persist(&incoming).await?;
                adopted += 1;
            }
        }
        if adopted > 0 {
            tracing::debug!(adopted, "Merged cloud tombstones");
        }
        Ok(adopted)
    }

    /// Discard every tombstone past its `permanent_delete_at`, irreversibly.
    /// Returns how many were discarded.
    pub async fn run_cleanup(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut discarded = 0;

        for tombstone in self.all_tombstones().await? {
            if tombstone.is_expired(now) {
                self.local.delete(TOMBSTONES, &tombstone.key()).await?;
                discarded += 1;
            }
        }

        if discarded > 0 {
            tracing::info!(discarded, "Cleaned up expired tombstones");
        }
        Ok(discarded)
    }

    /// Run cleanup immediately, then once a day. Abort the handle to stop.
    #[must_use]
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = service.run_cleanup().await {
                    tracing::error!("Tombstone cleanup failed: {e}");
                }
            }
        })
    }

    async fn fetch(&self, collection: Collection, id: &str) -> Result<Option<TombstoneRecord>> {
        let key = TombstoneRecord::key_for(collection, id);
        match self.local.get(TOMBSTONES, &key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn persist(&self, tombstone: &TombstoneRecord) -> Result<()> {
        self.local
            .put(TOMBSTONES, &tombstone.key(), &serde_json::to_value(tombstone)?)
            .await
    }

    async fn all_tombstones(&self) -> Result<Vec<TombstoneRecord>> {
        let values = self.local.list(TOMBSTONES).await?;
        let mut tombstones = Vec::with_capacity(values.len());
        for value in values {
            tombstones.push(serde_json::from_value(value)?);
        }
        Ok(tombstones)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::connectivity::Connectivity;
    use crate::models::{Budget, Settlement};
    use crate::queue::QueueConfig;
    use crate::remote::MemoryRemoteStore;
    use crate::store::LibSqlStore;

    async fn service() -> (TombstoneService, Arc<LibSqlStore>, SyncQueueEngine) {
        let local = Arc::new(LibSqlStore::open_in_memory().await.unwrap());
        let registry = Arc::new(CollectionRegistry::with_defaults());
        let queue = SyncQueueEngine::new(
            local.clone(),
            Arc::new(MemoryRemoteStore::new()),
            registry.clone(),
            Connectivity::offline(),
            QueueConfig::default(),
        );
        let service = TombstoneService::new(local.clone(), queue.clone(), registry, "device-1");
        (service, local, queue)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_soft_delete_then_restore_round_trip() {
        let (service, local, _) = service().await;

        let budget = Budget::new("food", 40_000);
        let id = budget.id.clone();
        let record = DomainRecord::Budget(budget);

        assert!(service.soft_delete(&record).await.unwrap());
        assert!(service
            .is_tombstoned(Collection::Budgets, &id)
            .await
            .unwrap());

        let deleted = service.deleted_items(Collection::Budgets).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].retention_days, 30);

        let restored = service.restore(Collection::Budgets, &id).await.unwrap();
        assert_eq!(restored, Some(record));

        // Restored records come back to the local store and stop shadowing
        assert!(local.get("budgets", &id).await.unwrap().is_some());
        assert!(!service
            .is_tombstoned(Collection::Budgets, &id)
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_requeues_at_high_tier() {
        let (service, _, queue) = service().await;

        let budget = Budget::new("travel", 10_000);
        let id = budget.id.clone();
        service
            .soft_delete(&DomainRecord::Budget(budget))
            .await
            .unwrap();
        service.restore(Collection::Budgets, &id).await.unwrap();

        assert_eq!(queue.pending(SyncTier::High).await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_non_deletable_collection_refuses() {
        let (service, local, _) = service().await;

        let record = DomainRecord::Settlement(Settlement::new("alice", "bob", 2_500));
        assert!(!service.soft_delete(&record).await.unwrap());
        assert!(local.list(TOMBSTONES).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_refused_after_expiry() {
        let (service, local, _) = service().await;

        let budget = Budget::new("stale", 1_000);
        let id = budget.id.clone();
        service
            .soft_delete(&DomainRecord::Budget(budget))
            .await
            .unwrap();

        // Age the tombstone past its retention window
        let key = TombstoneRecord::key_for(Collection::Budgets, &id);
        let mut value = local.get(TOMBSTONES, &key).await.unwrap().unwrap();
        value["permanent_delete_at"] = serde_json::json!(1);
        local.put(TOMBSTONES, &key, &value).await.unwrap();

        assert_eq!(service.restore(Collection::Budgets, &id).await.unwrap(), None);
        // The expired tombstone is left for the cleanup sweep
        assert!(local.get(TOMBSTONES, &key).await.unwrap().is_some());

        assert_eq!(service.run_cleanup().await.unwrap(), 1);
        assert!(local.get(TOMBSTONES, &key).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cloud_merge_is_idempotent_and_later_delete_wins() {
        let (service, _, _) = service().await;

        let mut older = TombstoneRecord::new(
            Collection::Goals,
            "g1",
            serde_json::json!({"record_type": "goal", "id": "g1"}),
            "device-2",
            30,
        );
        older.deleted_at = 1_000;
        let mut newer = older.clone();
        newer.deleted_at = 2_000;
        newer.deleted_by = "device-3".to_string();

        assert_eq!(
            service.merge_cloud_tombstones(vec![older.clone()]).await.unwrap(),
            1
        );
        // Same tombstone again changes nothing
        assert_eq!(service.merge_cloud_tombstones(vec![older]).await.unwrap(), 0);
        // A later deletion of the same id replaces the held tombstone
        assert_eq!(service.merge_cloud_tombstones(vec![newer]).await.unwrap(), 1);

        let held = service.deleted_items(Collection::Goals).await.unwrap();
        assert_eq!(held[0].deleted_at, 2_000);
        assert_eq!(held[0].deleted_by, "device-3");
    }
}
