//! Local-first data service
//!
//! The façade every feature calls. Writes land in the local store first and
//! always succeed offline; sync metadata is stamped here and nowhere else.
//! Deletes route through the tombstone service. Startup reconciliation
//! merges remote state into local using last-write-wins on `updated_at`,
//! with tombstones merged first so deletions are never resurrected.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::models::{AuditEntry, Collection, DomainRecord, SyncMetadata, TombstoneRecord};
use crate::queue::SyncQueueEngine;
use crate::registry::{CollectionRegistry, RetentionPolicy};
use crate::remote::{RemoteChange, RemoteStore};
use crate::store::{LocalStore, SYNC_META, TOMBSTONES};
use crate::tombstone::TombstoneService;

/// Minimum spacing between full-snapshot backups (6 hours).
const BACKUP_MIN_INTERVAL_MS: i64 = 6 * 60 * 60 * 1000;

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote copies adopted locally (new or strictly newer)
    pub adopted: usize,
    /// Conflicts where the local copy won (equal or newer timestamp)
    pub kept_local: usize,
    /// Local records re-enqueued for upload
    pub requeued: usize,
    /// Cloud tombstones folded into local state
    pub tombstones_merged: usize,
    /// True when the full remote snapshot was fetched (first sync)
    pub full: bool,
    /// True when the sync did not run (offline)
    pub skipped: bool,
}

/// Per-user sync bookkeeping, persisted in the `_sync_meta` collection.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct SyncBookkeeping {
    #[serde(default)]
    last_full_sync: Option<i64>,
    #[serde(default)]
    last_sync: Option<i64>,
    #[serde(default)]
    last_backup: Option<i64>,
}

/// The local-first data service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DataService {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    queue: SyncQueueEngine,
    tombstones: TombstoneService,
    registry: Arc<CollectionRegistry>,
    connectivity: Connectivity,
    user_id: String,
}

impl DataService {
    #[must_use]
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        queue: SyncQueueEngine,
        tombstones: TombstoneService,
        registry: Arc<CollectionRegistry>,
        connectivity: Connectivity,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            queue,
            tombstones,
            registry,
            connectivity,
            user_id: user_id.into(),
        }
    }

    /// Save a record: stamp sync metadata, write local, enqueue for upload,
    /// append an audit entry. Returns the record as stored.
    pub async fn save(&self, record: DomainRecord) -> Result<DomainRecord> {
        let record = self.stamp_and_store(record).await?;

        if record.collection() != Collection::AuditLog {
            self.append_audit("save", record.collection(), record.id()).await;
        }

        Ok(record)
    }

    /// Fetch a record from the local store.
    pub async fn get(&self, collection: Collection, id: &str) -> Result<Option<DomainRecord>> {
        match self.local.get(collection.as_str(), id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// All records of a collection from the local store, newest first.
    pub async fn list(&self, collection: Collection) -> Result<Vec<DomainRecord>> {
        let values = self.local.list(collection.as_str()).await?;
        let mut records = Vec::with_capacity(values.len());
        for value in values {
            records.push(serde_json::from_value(value)?);
        }
        Ok(records)
    }

    /// Delete a record. With `soft` (the default path), the record is
    /// captured into a tombstone first; non-deletable collections refuse.
    /// Always removes locally; attempts an immediate remote delete when
    /// online, enqueuing one otherwise. Deleting a trip cascades to its
    /// expenses, each child failure isolated.
    ///
    /// Returns `Ok(false)` when the record does not exist.
    pub async fn delete(&self, collection: Collection, id: &str, soft: bool) -> Result<bool> {
        if soft && self.registry.retention(collection) == RetentionPolicy::NonDeletable {
            return Err(Error::DeleteRefused(collection.as_str()));
        }

        let Some(record) = self.get(collection, id).await? else {
            return Ok(false);
        };

        if collection == Collection::Trips {
            self.cascade_trip_expenses(id, soft).await?;
        }

        if soft {
            self.tombstones.soft_delete(&record).await?;
        }

        self.local.delete(collection.as_str(), id).await?;

        // Offline-first: the local delete above is already durable; the
        // remote delete is best-effort now, queued on any failure
        let mut deferred = true;
        if self.connectivity.is_online() {
            match self.remote.delete_document(collection.as_str(), id).await {
                Ok(()) => deferred = false,
                Err(e) => {
                    tracing::debug!(
                        collection = collection.as_str(),
                        id,
                        "Immediate remote delete failed, queuing: {e}"
                    );
                }
            }
        }
        if deferred {
            self.queue.enqueue_delete(collection, id).await;
        }

        self.append_audit("delete", collection, id).await;
        Ok(true)
    }

    /// Reconcile local and remote state.
    ///
    /// First run fetches the full remote snapshot per collection;
    /// subsequent runs fetch only records changed since the last sync.
    /// Cloud tombstones are merged before record merge so a deletion from
    /// another device is never resurrected. Per record the copy with the
    /// strictly greater `updated_at` wins; ties keep local. Local records
    /// the remote is missing are re-enqueued for upload.
    pub async fn initial_sync(&self) -> Result<SyncReport> {
        if !self.connectivity.is_online() {
            tracing::debug!("Skipping sync while offline");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        }

        let started_at = chrono::Utc::now().timestamp_millis();
        let mut bookkeeping = self.bookkeeping().await?;
        let full = bookkeeping.last_full_sync.is_none();
        let since = bookkeeping.last_sync.unwrap_or(0);

        let mut report = SyncReport {
            full,
            ..SyncReport::default()
        };

        report.tombstones_merged = self.pull_cloud_tombstones().await?;

        for collection in Collection::ALL {
            let remote_docs = if full {
                self.remote.fetch_all(collection.as_str()).await?
            } else {
                self.remote.fetch_recent(collection.as_str(), since).await?
            };

            self.merge_collection(collection, remote_docs, full, &mut report)
                .await?;
        }

        if full {
            bookkeeping.last_full_sync = Some(started_at);
        }
        bookkeeping.last_sync = Some(started_at);
        self.store_bookkeeping(&bookkeeping).await?;

        tracing::info!(
            full,
            adopted = report.adopted,
            kept_local = report.kept_local,
            requeued = report.requeued,
            "Sync reconciliation finished"
        );
        Ok(report)
    }

    /// Upload full snapshots of every collection as a disaster-recovery
    /// mechanism, independent of the incremental queue. Throttled; returns
    /// the number of documents uploaded, 0 when throttled or offline.
    pub async fn backup_all(&self) -> Result<usize> {
        if !self.connectivity.is_online() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut bookkeeping = self.bookkeeping().await?;
        if let Some(last) = bookkeeping.last_backup {
            if now - last < BACKUP_MIN_INTERVAL_MS {
                tracing::debug!("Backup still within minimum interval, skipping");
                return Ok(0);
            }
        }

        let mut uploaded = 0;
        for collection in Collection::ALL {
            for doc in self.local.list(collection.as_str()).await? {
                let Some(id) = doc.get("id").and_then(Value::as_str) else {
                    continue;
                };
                self.remote
                    .save_document(collection.as_str(), id, &doc)
                    .await?;
                uploaded += 1;
            }
        }
        for doc in self.local.list(TOMBSTONES).await? {
            if let Ok(tombstone) = serde_json::from_value::<TombstoneRecord>(doc.clone()) {
                self.remote
                    .save_document(TOMBSTONES, &tombstone.key(), &doc)
                    .await?;
                uploaded += 1;
            }
        }

        bookkeeping.last_backup = Some(now);
        self.store_bookkeeping(&bookkeeping).await?;

        tracing::info!(uploaded, "Full backup uploaded");
        Ok(uploaded)
    }

    /// Changes observed on the remote store.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
        self.remote.subscribe()
    }

    /// Stamp a strictly increasing `updated_at` and fresh sync metadata,
    /// write the record locally, and enqueue it on its collection's tier.
    async fn stamp_and_store(&self, mut record: DomainRecord) -> Result<DomainRecord> {
        let collection = record.collection();
        let previous = self.local.get(collection.as_str(), record.id()).await?;

        let prev_updated_at = previous
            .as_ref()
            .and_then(|doc| doc.get("updated_at"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let prev_version = previous
            .as_ref()
            .and_then(|doc| doc.pointer("/sync/sync_version"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let prev_synced_at = previous
            .as_ref()
            .and_then(|doc| doc.pointer("/sync/last_synced_at"))
            .and_then(Value::as_i64);

        // updated_at must strictly increase on every local mutation; it is
        // the only merge signal
        let now = chrono::Utc::now().timestamp_millis();
        record.set_updated_at(now.max(prev_updated_at + 1));
        record.set_sync(Some(SyncMetadata {
            last_synced_at: prev_synced_at,
            sync_version: prev_version + 1,
            tier: self.registry.tier(collection),
            pending_sync: true,
            conflict_resolution: crate::models::ConflictStrategy::LastWriteWins,
        }));

        self.local
            .put(collection.as_str(), record.id(), &serde_json::to_value(&record)?)
            .await?;
        self.queue.enqueue_save(record.clone()).await;

        Ok(record)
    }

    /// Audit failures never fail the operation they describe.
    async fn append_audit(&self, action: &str, collection: Collection, record_id: &str) {
        let entry = AuditEntry::new(action, collection, record_id);
        if let Err(e) = self.stamp_and_store(DomainRecord::Audit(entry)).await {
            tracing::warn!("Failed to append audit entry: {e}");
        }
    }

    /// Delete every expense belonging to a trip, one failure not aborting
    /// the rest.
    async fn cascade_trip_expenses(&self, trip_id: &str, soft: bool) -> Result<()> {
        let expenses = self.local.list(Collection::TripExpenses.as_str()).await?;
        for doc in expenses {
            if doc.get("trip_id").and_then(Value::as_str) != Some(trip_id) {
                continue;
            }
            let Some(id) = doc.get("id").and_then(Value::as_str) else {
                continue;
            };
            let child = Box::pin(self.delete(Collection::TripExpenses, id, soft));
            if let Err(e) = child.await {
                tracing::error!(trip_id, expense = id, "Cascade delete of trip expense failed: {e}");
            }
        }
        Ok(())
    }

    async fn pull_cloud_tombstones(&self) -> Result<usize> {
        let docs = self.remote.fetch_all(TOMBSTONES).await?;
        let mut tombstones = Vec::with_capacity(docs.len());
        for doc in docs {
            match serde_json::from_value::<TombstoneRecord>(doc) {
                Ok(tombstone) => tombstones.push(tombstone),
                Err(e) => tracing::warn!("Ignoring malformed cloud tombstone: {e}"),
            }
        }
        self.tombstones.merge_cloud_tombstones(tombstones).await
    }

    /// Merge one collection's remote documents into local state and requeue
    /// what the remote is missing.
    ///
    /// The asymmetry is deliberate: remote-only copies are adopted only
    /// when strictly newer, while local-only records are always re-uploaded.
    /// Local writes are durable and authoritative until proven stale.
    async fn merge_collection(
        &self,
        collection: Collection,
        remote_docs: Vec<Value>,
        full: bool,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut remote_ids: std::collections::HashSet<String> = std::collections::HashSet::new();

        for doc in remote_docs {
            let Some(id) = doc.get("id").and_then(Value::as_str).map(str::to_owned) else {
                tracing::warn!(collection = collection.as_str(), "Remote document without id");
                continue;
            };
            remote_ids.insert(id.clone());

            if self.tombstones.is_tombstoned(collection, &id).await? {
                continue;
            }

            // Only well-shaped records cross the boundary; one malformed
            // remote document must not poison the collection locally
            if let Err(e) = serde_json::from_value::<DomainRecord>(doc.clone()) {
                tracing::warn!(
                    collection = collection.as_str(),
                    id = %id,
                    "Skipping malformed remote document: {e}"
                );
                continue;
            }

            // Records without a timestamp count as 0 and always lose
            let remote_updated_at = doc.get("updated_at").and_then(Value::as_i64).unwrap_or(0);
            if remote_updated_at == 0 {
                tracing::debug!(
                    collection = collection.as_str(),
                    id,
                    "Remote record has no update timestamp; it will lose any conflict"
                );
            }
            let local_doc = self.local.get(collection.as_str(), &id).await?;

            match local_doc {
                None => {
                    self.local.put(collection.as_str(), &id, &doc).await?;
                    report.adopted += 1;
                }
                Some(local) => {
                    let local_updated_at =
                        local.get("updated_at").and_then(Value::as_i64).unwrap_or(0);
                    if remote_updated_at > local_updated_at {
                        self.local.put(collection.as_str(), &id, &doc).await?;
                        report.adopted += 1;
                    } else {
                        report.kept_local += 1;
                    }
                }
            }
        }

        for doc in self.local.list(collection.as_str()).await? {
            let Some(id) = doc.get("id").and_then(Value::as_str).map(str::to_owned) else {
                continue;
            };

            let needs_upload = if full {
                // A full snapshot is authoritative for absence
                !remote_ids.contains(&id)
            } else {
                // Recent slices only prove presence; requeue what a prior
                // sync left unconfirmed
                doc.pointer("/sync/pending_sync").and_then(Value::as_bool) == Some(true)
                    && !remote_ids.contains(&id)
            };

            if needs_upload {
                match serde_json::from_value::<DomainRecord>(doc) {
                    Ok(record) => {
                        self.queue.enqueue_save(record).await;
                        report.requeued += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            collection = collection.as_str(),
                            id = %id,
                            "Local record not re-queueable: {e}"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    async fn bookkeeping(&self) -> Result<SyncBookkeeping> {
        match self.local.get(SYNC_META, &self.user_id).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(SyncBookkeeping::default()),
        }
    }

    async fn store_bookkeeping(&self, bookkeeping: &SyncBookkeeping) -> Result<()> {
        self.local
            .put(SYNC_META, &self.user_id, &serde_json::to_value(bookkeeping)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{Budget, Settlement, SyncTier, Transaction, Trip, TripExpense};
    use crate::queue::QueueConfig;
    use crate::remote::MemoryRemoteStore;
    use crate::store::LibSqlStore;

    struct Fixture {
        service: DataService,
        local: Arc<LibSqlStore>,
        remote: MemoryRemoteStore,
        queue: SyncQueueEngine,
        connectivity: Connectivity,
    }

    async fn fixture(connectivity: Connectivity) -> Fixture {
        let local = Arc::new(LibSqlStore::open_in_memory().await.unwrap());
        let remote = MemoryRemoteStore::new();
        let registry = Arc::new(CollectionRegistry::with_defaults());
        let queue = SyncQueueEngine::new(
            local.clone(),
            Arc::new(remote.clone()),
            registry.clone(),
            connectivity.clone(),
            QueueConfig::default(),
        );
        let tombstones =
            TombstoneService::new(local.clone(), queue.clone(), registry.clone(), "device-1");
        let service = DataService::new(
            local.clone(),
            Arc::new(remote.clone()),
            queue.clone(),
            tombstones,
            registry,
            connectivity.clone(),
            "user-1",
        );
        Fixture {
            service,
            local,
            remote,
            queue,
            connectivity,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_stamps_metadata_and_queues() {
        let f = fixture(Connectivity::offline()).await;

        let saved = f
            .service
            .save(DomainRecord::Transaction(Transaction::new(500, "groceries")))
            .await
            .unwrap();

        let sync = saved.sync().unwrap();
        assert!(sync.pending_sync);
        assert_eq!(sync.sync_version, 1);
        assert_eq!(sync.tier, SyncTier::High);

        // Durable locally even while offline, pending on the right tier
        let held = f
            .service
            .get(Collection::Transactions, saved.id())
            .await
            .unwrap();
        assert_eq!(held, Some(saved));
        assert_eq!(f.queue.pending(SyncTier::High).await, 1);
        // The audit entry queued at Low tier
        assert_eq!(f.queue.pending(SyncTier::Low).await, 1);
        assert_eq!(f.service.list(Collection::AuditLog).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_updated_at_strictly_increases() {
        let f = fixture(Connectivity::offline()).await;

        let first = f
            .service
            .save(DomainRecord::Budget(Budget::new("food", 10_000)))
            .await
            .unwrap();
        let second = f.service.save(first.clone()).await.unwrap();
        let third = f.service.save(second.clone()).await.unwrap();

        assert!(second.updated_at() > first.updated_at());
        assert!(third.updated_at() > second.updated_at());
        assert_eq!(third.sync().unwrap().sync_version, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_soft_delete_tombstones_and_queues_remote_delete() {
        let f = fixture(Connectivity::offline()).await;

        let saved = f
            .service
            .save(DomainRecord::Budget(Budget::new("food", 10_000)))
            .await
            .unwrap();
        let id = saved.id().to_string();

        assert!(f.service.delete(Collection::Budgets, &id, true).await.unwrap());
        assert!(f.service.get(Collection::Budgets, &id).await.unwrap().is_none());
        assert!(f.local.get(TOMBSTONES, &format!("budgets:{id}")).await.unwrap().is_some());
        assert!(f.queue.pending(SyncTier::Normal).await >= 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_online_delete_hits_remote_directly() {
        let f = fixture(Connectivity::online()).await;

        let saved = f
            .service
            .save(DomainRecord::Budget(Budget::new("food", 10_000)))
            .await
            .unwrap();
        let id = saved.id().to_string();
        f.remote.seed("budgets", &id, serde_json::to_value(&saved).unwrap());

        f.service.delete(Collection::Budgets, &id, true).await.unwrap();
        assert!(f.remote.document("budgets", &id).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_soft_delete_refused_for_non_deletable() {
        let f = fixture(Connectivity::offline()).await;

        let saved = f
            .service
            .save(DomainRecord::Settlement(Settlement::new("alice", "bob", 100)))
            .await
            .unwrap();

        let result = f
            .service
            .delete(Collection::Settlements, saved.id(), true)
            .await;
        assert!(matches!(result, Err(Error::DeleteRefused("settlements"))));
        // The record is untouched
        assert!(f
            .service
            .get(Collection::Settlements, saved.id())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trip_delete_cascades_to_expenses() {
        let f = fixture(Connectivity::offline()).await;

        let trip = f
            .service
            .save(DomainRecord::Trip(Trip::new("lisbon", "EUR")))
            .await
            .unwrap();
        let trip_id = trip.id().to_string();
        for _ in 0..2 {
            f.service
                .save(DomainRecord::TripExpense(TripExpense::new(&trip_id, 900)))
                .await
                .unwrap();
        }
        // An expense of another trip stays
        f.service
            .save(DomainRecord::TripExpense(TripExpense::new("other-trip", 1)))
            .await
            .unwrap();

        f.service.delete(Collection::Trips, &trip_id, true).await.unwrap();

        let remaining = f.service.list(Collection::TripExpenses).await.unwrap();
        assert_eq!(remaining.len(), 1);
        let tombstoned = f
            .service
            .tombstones
            .deleted_items(Collection::TripExpenses)
            .await
            .unwrap();
        assert_eq!(tombstoned.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initial_sync_adopts_newer_keeps_local_requeues_missing() {
        let f = fixture(Connectivity::online()).await;

        // Local-only record, saved while offline conceptually
        f.connectivity.set(crate::connectivity::NetworkClass::Offline);
        let local_only = f
            .service
            .save(DomainRecord::Budget(Budget::new("local-only", 1_000)))
            .await
            .unwrap();
        f.connectivity.set(crate::connectivity::NetworkClass::Moderate);

        // Remote has a strictly newer copy of one record
        let mut stale = Budget::new("stale-local", 2_000);
        stale.id = "b-remote-newer".to_string();
        let stored = f.service.save(DomainRecord::Budget(stale)).await.unwrap();
        let mut newer = serde_json::to_value(&stored).unwrap();
        newer["updated_at"] = serde_json::json!(stored.updated_at() + 10_000);
        newer["name"] = serde_json::json!("remote-won");
        f.remote.seed("budgets", "b-remote-newer", newer);

        // Remote also has an older copy of another record
        let kept = f
            .service
            .save(DomainRecord::Budget(Budget::new("keep-local", 3_000)))
            .await
            .unwrap();
        let mut older = serde_json::to_value(&kept).unwrap();
        older["updated_at"] = serde_json::json!(1);
        f.remote.seed("budgets", kept.id(), older);

        let report = f.service.initial_sync().await.unwrap();
        assert!(report.full);
        assert_eq!(report.adopted, 1);
        assert!(report.kept_local >= 1);
        assert!(report.requeued >= 1);

        let won = f
            .service
            .get(Collection::Budgets, "b-remote-newer")
            .await
            .unwrap()
            .unwrap();
        match won {
            DomainRecord::Budget(b) => assert_eq!(b.name, "remote-won"),
            other => panic!("unexpected record: {other:?}"),
        }

        // Local-only record and the kept-local record remain
        assert!(f
            .service
            .get(Collection::Budgets, local_only.id())
            .await
            .unwrap()
            .is_some());

        // Second sync is incremental
        let second = f.service.initial_sync().await.unwrap();
        assert!(!second.full);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tombstone_suppresses_resurrection() {
        let f = fixture(Connectivity::online()).await;

        let saved = f
            .service
            .save(DomainRecord::Goal(crate::models::Goal::new("vacation", 500_000)))
            .await
            .unwrap();
        let id = saved.id().to_string();
        f.service.delete(Collection::Goals, &id, true).await.unwrap();

        // A stale copy from another device surfaces during the next sync
        let mut stale = serde_json::to_value(&saved).unwrap();
        stale["updated_at"] = serde_json::json!(1);
        f.remote.seed("goals", &id, stale);

        f.service.initial_sync().await.unwrap();
        assert!(f.service.get(Collection::Goals, &id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_remote_document_is_skipped() {
        let f = fixture(Connectivity::online()).await;

        // A doc with an id but no recognizable shape must not be adopted;
        // once adopted it would break every later read of the collection
        f.remote.seed(
            "transactions",
            "bad",
            serde_json::json!({"id": "bad", "updated_at": 99, "garbage": true}),
        );
        let mut healthy = Transaction::new(700, "fuel");
        healthy.id = "good".to_string();
        f.remote.seed(
            "transactions",
            "good",
            serde_json::to_value(DomainRecord::Transaction(healthy)).unwrap(),
        );

        let report = f.service.initial_sync().await.unwrap();
        assert_eq!(report.adopted, 1);

        let listed = f.service.list(Collection::Transactions).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id(), "good");
        assert!(f
            .service
            .get(Collection::Transactions, "bad")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backup_uploads_then_throttles() {
        let f = fixture(Connectivity::online()).await;

        f.service
            .save(DomainRecord::Transaction(Transaction::new(700, "fuel")))
            .await
            .unwrap();

        let uploaded = f.service.backup_all().await.unwrap();
        // The transaction plus its audit entry
        assert_eq!(uploaded, 2);

        assert_eq!(f.service.backup_all().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_skipped_offline() {
        let f = fixture(Connectivity::offline()).await;
        let report = f.service.initial_sync().await.unwrap();
        assert!(report.skipped);
    }
}
