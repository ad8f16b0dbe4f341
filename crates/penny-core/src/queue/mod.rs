//! Tiered sync queue engine
//!
//! Holds one in-memory queue of pending remote operations per priority
//! tier. Tiers drain on independent timers (Critical also drains
//! immediately on enqueue), gated by the sliding-window rate limiter, with
//! exponential-backoff retry scheduling. All shared state lives behind one
//! `tokio::sync::Mutex`; a per-tier `processing` flag is the sole guard
//! against a timer starting a second drain while an earlier one is still
//! awaiting network I/O.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::connectivity::Connectivity;
use crate::models::{Collection, DomainRecord, Operation, QueuedOperation, SyncTier, TombstoneRecord};
use crate::rate_limit::SlidingWindowLimiter;
use crate::registry::CollectionRegistry;
use crate::remote::{RemoteError, RemoteStore};
use crate::store::{LocalStore, TOMBSTONES};

/// Tuning knobs for the queue engine.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Rate limiter: operations admitted per window
    pub max_ops_per_window: usize,
    /// Rate limiter window length
    pub window: Duration,
    /// Minimum spacing between `process_all_queues` runs
    pub force_sync_cooldown: Duration,
    /// Failures tolerated per operation before it is dropped
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_ops_per_window: 30,
            window: Duration::from_secs(10),
            force_sync_cooldown: Duration::from_secs(10),
            max_retries: 5,
        }
    }
}

/// What a single drain cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Confirmed on the remote store
    pub sent: usize,
    /// Failed transiently, requeued for retry
    pub failed: usize,
    /// Deferred by the rate limiter, requeued unchanged
    pub rate_limited: usize,
    /// Abandoned after exhausting the retry ceiling
    pub dropped: usize,
    /// Discarded because the remote denied permission
    pub denied: usize,
    /// The drain did not run (already processing, offline, or cooldown)
    pub skipped: bool,
}

impl DrainOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: Self) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.rate_limited += other.rate_limited;
        self.dropped += other.dropped;
        self.denied += other.denied;
    }
}

#[derive(Debug, Default)]
struct TierQueue {
    ops: VecDeque<QueuedOperation>,
    /// True while a drain for this tier is awaiting network I/O
    processing: bool,
    /// True while a backoff timer for this tier is outstanding
    retry_scheduled: bool,
}

struct EngineState {
    queues: [TierQueue; 4],
    limiter: SlidingWindowLimiter,
    last_process_all: Option<Instant>,
}

impl EngineState {
    fn queue(&mut self, tier: SyncTier) -> &mut TierQueue {
        &mut self.queues[tier_index(tier)]
    }
}

const fn tier_index(tier: SyncTier) -> usize {
    match tier {
        SyncTier::Critical => 0,
        SyncTier::High => 1,
        SyncTier::Normal => 2,
        SyncTier::Low => 3,
    }
}

/// The tiered sync queue engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncQueueEngine {
    state: Arc<Mutex<EngineState>>,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    registry: Arc<CollectionRegistry>,
    connectivity: Connectivity,
    config: QueueConfig,
}

impl SyncQueueEngine {
    #[must_use]
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        registry: Arc<CollectionRegistry>,
        connectivity: Connectivity,
        config: QueueConfig,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState {
                queues: [
                    TierQueue::default(),
                    TierQueue::default(),
                    TierQueue::default(),
                    TierQueue::default(),
                ],
                limiter: SlidingWindowLimiter::new(config.max_ops_per_window, config.window),
                last_process_all: None,
            })),
            local,
            remote,
            registry,
            connectivity,
            config,
        }
    }

    /// Enqueue an operation, replacing any pending operation for the same
    /// `(collection, record id)` in the same tier. Critical-tier enqueues
    /// trigger an immediate drain while online.
    pub async fn enqueue(&self, op: QueuedOperation) {
        let tier = op.tier;

        {
            let mut state = self.state.lock().await;
            let queue = state.queue(tier);
            let key = (op.collection, op.record_id());

            if let Some(existing) = queue
                .ops
                .iter_mut()
                .find(|queued| (queued.collection, queued.record_id()) == key)
            {
                // Only the latest mutation per entity needs shipping
                *existing = op;
            } else {
                queue.ops.push_back(op);
            }
        }

        if tier.immediate() && self.connectivity.is_online() {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.drain(tier).await;
            });
        }
    }

    /// Enqueue a save on the collection's registered tier.
    pub async fn enqueue_save(&self, record: DomainRecord) {
        let tier = self.registry.tier(record.collection());
        self.enqueue(QueuedOperation::save(record, tier)).await;
    }

    /// Enqueue a save on an explicit tier, overriding collection policy.
    pub async fn enqueue_save_with_tier(&self, record: DomainRecord, tier: SyncTier) {
        self.enqueue(QueuedOperation::save(record, tier)).await;
    }

    /// Enqueue a remote delete on the collection's registered tier.
    pub async fn enqueue_delete(&self, collection: Collection, record_id: &str) {
        let tier = self.registry.tier(collection);
        self.enqueue(QueuedOperation::delete(collection, record_id, tier))
            .await;
    }

    /// Enqueue a tombstone upload so other devices observe the deletion.
    pub async fn enqueue_tombstone(&self, tombstone: TombstoneRecord, tier: SyncTier) {
        self.enqueue(QueuedOperation::save_tombstone(tombstone, tier))
            .await;
    }

    /// Number of operations pending on one tier.
    pub async fn pending(&self, tier: SyncTier) -> usize {
        let mut state = self.state.lock().await;
        state.queue(tier).ops.len()
    }

    /// Pending operation counts per tier, priority order.
    pub async fn pending_counts(&self) -> [(SyncTier, usize); 4] {
        let mut state = self.state.lock().await;
        SyncTier::ALL.map(|tier| (tier, state.queue(tier).ops.len()))
    }

    /// Drain one tier: take an adaptive batch, gate each operation on the
    /// rate limiter, and issue the admitted ones concurrently.
    ///
    /// Boxed because the retry timer a drain schedules eventually drains
    /// again; the indirection keeps the future type finite.
    pub fn drain(&self, tier: SyncTier) -> Pin<Box<dyn Future<Output = DrainOutcome> + Send + '_>> {
        Box::pin(self.drain_inner(tier))
    }

    async fn drain_inner(&self, tier: SyncTier) -> DrainOutcome {
        if !self.connectivity.is_online() {
            return DrainOutcome::skipped();
        }

        let batch = {
            let mut state = self.state.lock().await;
            let capacity = state.limiter.remaining_operations();
            let queue = state.queue(tier);

            if queue.processing {
                return DrainOutcome::skipped();
            }
            if queue.ops.is_empty() {
                return DrainOutcome::default();
            }

            let scaled = self.connectivity.class().scale_batch(tier.batch_size());
            if scaled == 0 {
                return DrainOutcome::skipped();
            }
            // With the limiter exhausted, still take one op so it travels
            // the rate-limited path and the retry lands on the next slot
            let take = scaled.min(capacity.max(1));

            queue.processing = true;
            let mut batch = Vec::with_capacity(take);
            for _ in 0..take {
                match queue.ops.pop_front() {
                    Some(op) => batch.push(op),
                    None => break,
                }
            }
            batch
        };

        let (admitted, rate_limited) = {
            let mut state = self.state.lock().await;
            let mut admitted = Vec::new();
            let mut rate_limited = Vec::new();
            for op in batch {
                if state.limiter.try_acquire() {
                    admitted.push(op);
                } else {
                    rate_limited.push(op);
                }
            }
            (admitted, rate_limited)
        };

        let mut outcome = DrainOutcome {
            rate_limited: rate_limited.len(),
            ..DrainOutcome::default()
        };

        let mut in_flight = JoinSet::new();
        for op in admitted {
            let remote = Arc::clone(&self.remote);
            let local = Arc::clone(&self.local);
            in_flight.spawn(async move {
                let result = send_operation(remote.as_ref(), local.as_ref(), &op).await;
                (op, result)
            });
        }

        let mut requeue_front: Vec<QueuedOperation> = rate_limited;
        let mut requeue_back: Vec<QueuedOperation> = Vec::new();
        let mut max_attempt: u32 = 0;

        while let Some(joined) = in_flight.join_next().await {
            let Ok((mut op, result)) = joined else {
                continue;
            };
            match result {
                Ok(()) => outcome.sent += 1,
                Err(RemoteError::PermissionDenied) => {
                    // Local-only mode: keep the data local, stop pushing
                    tracing::debug!(
                        collection = op.collection.as_str(),
                        id = %op.record_id(),
                        "Remote denied permission, dropping queued operation"
                    );
                    outcome.denied += 1;
                }
                Err(e) => {
                    op.retry_count += 1;
                    if op.retry_count > self.config.max_retries {
                        tracing::error!(
                            collection = op.collection.as_str(),
                            id = %op.record_id(),
                            retries = op.retry_count,
                            "Abandoning sync operation after repeated failures: {e}"
                        );
                        outcome.dropped += 1;
                    } else {
                        tracing::warn!(
                            collection = op.collection.as_str(),
                            id = %op.record_id(),
                            attempt = op.retry_count,
                            "Sync operation failed, will retry: {e}"
                        );
                        max_attempt = max_attempt.max(op.retry_count);
                        outcome.failed += 1;
                        requeue_back.push(op);
                    }
                }
            }
        }

        let needs_retry = !requeue_front.is_empty() || !requeue_back.is_empty();

        let retry_delay = {
            let mut state = self.state.lock().await;
            let queue = state.queue(tier);
            // Rate-limited ops go back to the front, keeping their order
            for op in requeue_front.drain(..).rev() {
                queue.ops.push_front(op);
            }
            queue.ops.extend(requeue_back.drain(..));
            queue.processing = false;

            if needs_retry && !queue.retry_scheduled {
                queue.retry_scheduled = true;
                Some(backoff_delay(tier, max_attempt.max(1)).max(state.limiter.time_until_next_slot()))
            } else {
                None
            }
        };

        if let Some(delay) = retry_delay {
            tracing::debug!(tier = tier.label(), ?delay, "Scheduling retry drain");
            let engine = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut state = engine.state.lock().await;
                    state.queue(tier).retry_scheduled = false;
                }
                engine.drain(tier).await;
            });
        }

        outcome
    }

    /// Drain every tier once, highest priority first, short-circuiting when
    /// the rate limiter is exhausted. Throttled to one run per cooldown
    /// window so reconnects, manual refreshes and timers firing together do
    /// not stampede the remote.
    pub async fn process_all_queues(&self) -> DrainOutcome {
        {
            let mut state = self.state.lock().await;
            if let Some(last) = state.last_process_all {
                if last.elapsed() < self.config.force_sync_cooldown {
                    tracing::debug!("Full queue sweep still cooling down, skipping");
                    return DrainOutcome::skipped();
                }
            }
            state.last_process_all = Some(Instant::now());
        }

        let mut total = DrainOutcome::default();
        for tier in SyncTier::ALL {
            {
                let state = self.state.lock().await;
                if !state.limiter.can_proceed() {
                    tracing::debug!(tier = tier.label(), "Rate limit exhausted, ending sweep");
                    break;
                }
            }
            total.absorb(self.drain(tier).await);
        }
        total
    }

    /// Start the per-tier background drain timers. Dropping the returned
    /// handle stops them.
    #[must_use]
    pub fn spawn_background(&self) -> BackgroundDrains {
        let handles = SyncTier::ALL
            .into_iter()
            .map(|tier| {
                let engine = self.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(tier.drain_interval());
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    // The first tick fires immediately; skip it so startup
                    // merges run before the first timed drain
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        engine.drain(tier).await;
                    }
                })
            })
            .collect();

        BackgroundDrains { handles }
    }
}

/// Running per-tier drain timers; aborted on drop.
pub struct BackgroundDrains {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for BackgroundDrains {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Exponential backoff for a tier, capped, with jitter where the tier
/// calls for it.
fn backoff_delay(tier: SyncTier, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    let delay = tier
        .backoff_base()
        .saturating_mul(2u32.saturating_pow(exp))
        .min(tier.backoff_max());

    if tier.jittered() {
        let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
        delay + Duration::from_millis(jitter_ms)
    } else {
        delay
    }
}

/// Perform one queued operation against the remote store. On a confirmed
/// save the local copy's `pending_sync` flag is cleared, but only if the
/// local record is still the version that was sent.
async fn send_operation(
    remote: &dyn RemoteStore,
    local: &dyn LocalStore,
    op: &QueuedOperation,
) -> Result<(), RemoteError> {
    match &op.operation {
        Operation::Save(record) => {
            let body = serde_json::to_value(record)
                .map_err(|e| RemoteError::Failed(format!("Unserializable record: {e}")))?;
            remote
                .save_document(op.collection.as_str(), record.id(), &body)
                .await?;
            clear_pending_sync(local, op.collection, record.id(), record.updated_at()).await;
            Ok(())
        }
        Operation::SaveTombstone(tombstone) => {
            let body = serde_json::to_value(tombstone)
                .map_err(|e| RemoteError::Failed(format!("Unserializable tombstone: {e}")))?;
            remote.save_document(TOMBSTONES, &tombstone.key(), &body).await
        }
        Operation::Delete { record_id } => {
            remote.delete_document(op.collection.as_str(), record_id).await
        }
    }
}

async fn clear_pending_sync(
    local: &dyn LocalStore,
    collection: Collection,
    id: &str,
    sent_updated_at: i64,
) {
    let fetched = match local.get(collection.as_str(), id).await {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!("Failed to read back {collection}/{id} after sync: {e}");
            return;
        }
    };

    let Some(mut doc) = fetched else { return };

    // A newer local mutation is already queued; leave its flag alone
    let local_updated_at = doc.get("updated_at").and_then(Value::as_i64).unwrap_or(0);
    if local_updated_at != sent_updated_at {
        return;
    }

    if let Some(sync) = doc.get_mut("sync").and_then(Value::as_object_mut) {
        sync.insert("pending_sync".to_string(), Value::Bool(false));
        sync.insert(
            "last_synced_at".to_string(),
            Value::from(chrono::Utc::now().timestamp_millis()),
        );
        if let Err(e) = local.put(collection.as_str(), id, &doc).await {
            tracing::warn!("Failed to clear pending_sync for {collection}/{id}: {e}");
        }
    }
}
