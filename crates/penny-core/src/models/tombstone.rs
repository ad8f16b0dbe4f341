//! Tombstone records for the soft-delete lifecycle

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::collection::Collection;

pub(crate) const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// A retained record of a deletion.
///
/// Created on every soft delete; lives until restored or until
/// `permanent_delete_at` passes and the cleanup sweep discards it.
/// Tombstones are what stop a record deleted on one device from being
/// resurrected by another device's merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TombstoneRecord {
    /// Id of the deleted record
    pub id: String,
    pub collection: Collection,
    /// Last known value of the record, kept for restore
    pub data: Value,
    /// When the delete happened (Unix ms)
    pub deleted_at: i64,
    /// Device that performed the delete
    pub deleted_by: String,
    pub retention_days: u32,
    /// Past this instant the tombstone is irrecoverably discarded (Unix ms)
    pub permanent_delete_at: i64,
    #[serde(default)]
    pub restored: bool,
    #[serde(default)]
    pub restored_at: Option<i64>,
}

impl TombstoneRecord {
    #[must_use]
    pub fn new(
        collection: Collection,
        record_id: impl Into<String>,
        data: Value,
        deleted_by: impl Into<String>,
        retention_days: u32,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: record_id.into(),
            collection,
            data,
            deleted_at: now,
            deleted_by: deleted_by.into(),
            retention_days,
            permanent_delete_at: now + i64::from(retention_days) * DAY_MS,
            restored: false,
            restored_at: None,
        }
    }

    /// Storage key: tombstones are keyed by `(collection, id)`.
    #[must_use]
    pub fn key(&self) -> String {
        Self::key_for(self.collection, &self.id)
    }

    #[must_use]
    pub fn key_for(collection: Collection, record_id: &str) -> String {
        format!("{}:{record_id}", collection.as_str())
    }

    /// Whether the retention window has elapsed.
    #[must_use]
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.permanent_delete_at
    }

    /// Whether this tombstone still suppresses resurrection of its record.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_sets_permanent_delete_at() {
        let tombstone = TombstoneRecord::new(
            Collection::Budgets,
            "b1",
            serde_json::json!({"id": "b1"}),
            "device-1",
            30,
        );
        assert_eq!(
            tombstone.permanent_delete_at,
            tombstone.deleted_at + 30 * DAY_MS
        );
        assert!(tombstone.is_active());
        assert!(!tombstone.is_expired(tombstone.deleted_at + 29 * DAY_MS));
        assert!(tombstone.is_expired(tombstone.deleted_at + 31 * DAY_MS));
    }

    #[test]
    fn test_key_includes_collection() {
        let tombstone = TombstoneRecord::new(
            Collection::Goals,
            "g1",
            Value::Null,
            "device-1",
            7,
        );
        assert_eq!(tombstone.key(), "goals:g1");
    }
}
