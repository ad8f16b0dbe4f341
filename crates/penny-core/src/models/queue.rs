//! Queue types: tiers and queued operations

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::collection::Collection;
use super::record::{new_record_id, DomainRecord};
use crate::models::TombstoneRecord;

/// Priority class controlling how urgently a queued operation is synchronized.
///
/// Ordering is priority order: `Critical` drains before `High` before
/// `Normal` before `Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SyncTier {
    Critical,
    High,
    Normal,
    Low,
}

impl SyncTier {
    /// All tiers, highest priority first.
    pub const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// How often the background timer drains this tier.
    #[must_use]
    pub const fn drain_interval(self) -> Duration {
        match self {
            Self::Critical => Duration::from_secs(2),
            Self::High => Duration::from_secs(15),
            Self::Normal => Duration::from_secs(60),
            Self::Low => Duration::from_secs(300),
        }
    }

    /// Base number of operations taken per drain cycle, before network-class
    /// scaling.
    #[must_use]
    pub const fn batch_size(self) -> usize {
        match self {
            Self::Critical | Self::High => 10,
            Self::Normal => 20,
            Self::Low => 50,
        }
    }

    /// Whether enqueuing on this tier triggers an immediate drain.
    #[must_use]
    pub const fn immediate(self) -> bool {
        matches!(self, Self::Critical)
    }

    /// First retry delay after a failed drain cycle.
    #[must_use]
    pub const fn backoff_base(self) -> Duration {
        match self {
            Self::Critical => Duration::from_millis(50),
            Self::High => Duration::from_secs(2),
            Self::Normal => Duration::from_secs(5),
            Self::Low => Duration::from_secs(8),
        }
    }

    /// Upper bound on the exponential backoff for this tier.
    #[must_use]
    pub const fn backoff_max(self) -> Duration {
        match self {
            Self::Critical => Duration::from_secs(1),
            Self::High => Duration::from_secs(8),
            Self::Normal => Duration::from_secs(30),
            Self::Low => Duration::from_secs(60),
        }
    }

    /// Normal and Low tiers add random jitter to spread retries out.
    #[must_use]
    pub const fn jittered(self) -> bool {
        matches!(self, Self::Normal | Self::Low)
    }
}

/// The remote operation a queue entry performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Save(DomainRecord),
    SaveTombstone(TombstoneRecord),
    Delete { record_id: String },
}

/// A pending remote operation held by the queue engine.
///
/// Identity for de-duplication is `(collection, record_id())`: enqueuing an
/// operation for an id already queued in the same tier replaces the pending
/// one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    pub collection: Collection,
    pub operation: Operation,
    pub tier: SyncTier,
    /// When the operation was enqueued (Unix ms)
    pub queued_at: i64,
    pub retry_count: u32,
}

impl QueuedOperation {
    #[must_use]
    pub fn save(record: DomainRecord, tier: SyncTier) -> Self {
        Self {
            id: new_record_id(),
            collection: record.collection(),
            operation: Operation::Save(record),
            tier,
            queued_at: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
        }
    }

    #[must_use]
    pub fn save_tombstone(tombstone: TombstoneRecord, tier: SyncTier) -> Self {
        Self {
            id: new_record_id(),
            collection: tombstone.collection,
            operation: Operation::SaveTombstone(tombstone),
            tier,
            queued_at: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
        }
    }

    #[must_use]
    pub fn delete(collection: Collection, record_id: impl Into<String>, tier: SyncTier) -> Self {
        Self {
            id: new_record_id(),
            collection,
            operation: Operation::Delete {
                record_id: record_id.into(),
            },
            tier,
            queued_at: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
        }
    }

    /// The id of the entity this operation targets, used for de-duplication.
    ///
    /// Tombstone uploads use the composite `collection:id` key so they never
    /// collide with a queued save of the live record.
    #[must_use]
    pub fn record_id(&self) -> String {
        match &self.operation {
            Operation::Save(record) => record.id().to_string(),
            Operation::SaveTombstone(tombstone) => tombstone.key(),
            Operation::Delete { record_id } => record_id.clone(),
        }
    }
}
