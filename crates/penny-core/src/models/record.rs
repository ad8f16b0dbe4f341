//! Domain records and sync metadata
//!
//! Every record carries a stable `id` and a Unix-millisecond `updated_at`
//! which is the sole conflict-resolution signal: merges adopt whichever copy
//! has the strictly greater timestamp. A record arriving without a timestamp
//! deserializes as 0 and therefore always loses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::collection::Collection;
use super::queue::SyncTier;
use crate::vault::EncryptedVaultRecord;

/// Create a new time-sortable record id (UUID v7).
#[must_use]
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// Strategy used when a local and remote copy of a record disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    LastWriteWins,
}

/// Sync bookkeeping stamped onto a record by the data service.
///
/// The data service is the only writer of this struct; the queue engine may
/// clear `pending_sync` after a confirmed remote write, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// When the record was last confirmed on the remote store (Unix ms)
    pub last_synced_at: Option<i64>,
    /// Monotonic local mutation counter
    pub sync_version: u32,
    /// Tier the record syncs on
    pub tier: SyncTier,
    /// True while a local mutation has not reached the remote store
    pub pending_sync: bool,
    /// How conflicts for this record are resolved
    #[serde(default)]
    pub conflict_resolution: ConflictStrategy,
}

/// A money movement (everyday spending/income).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Amount in minor currency units (cents)
    pub amount_minor: i64,
    pub category: String,
    #[serde(default)]
    pub note: String,
    /// When the money moved (Unix ms)
    pub occurred_at: i64,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

impl Transaction {
    #[must_use]
    pub fn new(amount_minor: i64, category: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            amount_minor,
            category: category.into(),
            note: String::new(),
            occurred_at: now,
            created_at: now,
            updated_at: now,
            sync: None,
        }
    }
}

/// A spending cap for a category over a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: String,
    pub name: String,
    pub limit_minor: i64,
    /// Budget period, e.g. "monthly"
    pub period: String,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

impl Budget {
    #[must_use]
    pub fn new(name: impl Into<String>, limit_minor: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            name: name.into(),
            limit_minor,
            period: "monthly".to_string(),
            created_at: now,
            updated_at: now,
            sync: None,
        }
    }
}

/// A savings goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub name: String,
    pub target_minor: i64,
    #[serde(default)]
    pub saved_minor: i64,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

impl Goal {
    #[must_use]
    pub fn new(name: impl Into<String>, target_minor: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            name: name.into(),
            target_minor,
            saved_minor: 0,
            created_at: now,
            updated_at: now,
            sync: None,
        }
    }
}

/// A trip grouping shared expenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub name: String,
    pub currency: String,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

impl Trip {
    #[must_use]
    pub fn new(name: impl Into<String>, currency: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            name: name.into(),
            currency: currency.into(),
            created_at: now,
            updated_at: now,
            sync: None,
        }
    }
}

/// A single expense inside a trip. Deleting the parent trip cascades here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripExpense {
    pub id: String,
    pub trip_id: String,
    pub amount_minor: i64,
    #[serde(default)]
    pub description: String,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

impl TripExpense {
    #[must_use]
    pub fn new(trip_id: impl Into<String>, amount_minor: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            trip_id: trip_id.into(),
            amount_minor,
            description: String::new(),
            created_at: now,
            updated_at: now,
            sync: None,
        }
    }
}

/// A cross-party settlement. Settlements are non-deletable: they must never
/// silently disappear from either party's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: String,
    pub payer: String,
    pub payee: String,
    pub amount_minor: i64,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

impl Settlement {
    #[must_use]
    pub fn new(payer: impl Into<String>, payee: impl Into<String>, amount_minor: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            payer: payer.into(),
            payee: payee.into(),
            amount_minor,
            created_at: now,
            updated_at: now,
            sync: None,
        }
    }
}

/// Audit-trail entry appended on every save/delete, synced at Low tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    /// "save" or "delete"
    pub action: String,
    pub collection: Collection,
    pub record_id: String,
    pub at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(action: impl Into<String>, collection: Collection, record_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            action: action.into(),
            collection,
            record_id: record_id.into(),
            at: now,
            updated_at: now,
            sync: None,
        }
    }
}

/// Tagged union over the known collections.
///
/// Queued operations and merge logic carry this instead of loose JSON so a
/// payload of the wrong shape cannot reach the stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum DomainRecord {
    Transaction(Transaction),
    Budget(Budget),
    Goal(Goal),
    Trip(Trip),
    TripExpense(TripExpense),
    Settlement(Settlement),
    Vault(EncryptedVaultRecord),
    Audit(AuditEntry),
}

impl DomainRecord {
    /// The collection this record belongs to.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Transaction(_) => Collection::Transactions,
            Self::Budget(_) => Collection::Budgets,
            Self::Goal(_) => Collection::Goals,
            Self::Trip(_) => Collection::Trips,
            Self::TripExpense(_) => Collection::TripExpenses,
            Self::Settlement(_) => Collection::Settlements,
            Self::Vault(_) => Collection::Vault,
            Self::Audit(_) => Collection::AuditLog,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Transaction(r) => &r.id,
            Self::Budget(r) => &r.id,
            Self::Goal(r) => &r.id,
            Self::Trip(r) => &r.id,
            Self::TripExpense(r) => &r.id,
            Self::Settlement(r) => &r.id,
            Self::Vault(r) => &r.id,
            Self::Audit(r) => &r.id,
        }
    }

    #[must_use]
    pub const fn updated_at(&self) -> i64 {
        match self {
            Self::Transaction(r) => r.updated_at,
            Self::Budget(r) => r.updated_at,
            Self::Goal(r) => r.updated_at,
            Self::Trip(r) => r.updated_at,
            Self::TripExpense(r) => r.updated_at,
            Self::Settlement(r) => r.updated_at,
            Self::Vault(r) => r.updated_at,
            Self::Audit(r) => r.updated_at,
        }
    }

    pub fn set_updated_at(&mut self, updated_at: i64) {
        match self {
            Self::Transaction(r) => r.updated_at = updated_at,
            Self::Budget(r) => r.updated_at = updated_at,
            Self::Goal(r) => r.updated_at = updated_at,
            Self::Trip(r) => r.updated_at = updated_at,
            Self::TripExpense(r) => r.updated_at = updated_at,
            Self::Settlement(r) => r.updated_at = updated_at,
            Self::Vault(r) => r.updated_at = updated_at,
            Self::Audit(r) => r.updated_at = updated_at,
        }
    }

    #[must_use]
    pub const fn sync(&self) -> Option<&SyncMetadata> {
        match self {
            Self::Transaction(r) => r.sync.as_ref(),
            Self::Budget(r) => r.sync.as_ref(),
            Self::Goal(r) => r.sync.as_ref(),
            Self::Trip(r) => r.sync.as_ref(),
            Self::TripExpense(r) => r.sync.as_ref(),
            Self::Settlement(r) => r.sync.as_ref(),
            Self::Vault(r) => r.sync.as_ref(),
            Self::Audit(r) => r.sync.as_ref(),
        }
    }

    pub fn set_sync(&mut self, sync: Option<SyncMetadata>) {
        match self {
            Self::Transaction(r) => r.sync = sync,
            Self::Budget(r) => r.sync = sync,
            Self::Goal(r) => r.sync = sync,
            Self::Trip(r) => r.sync = sync,
            Self::TripExpense(r) => r.sync = sync,
            Self::Settlement(r) => r.sync = sync,
            Self::Vault(r) => r.sync = sync,
            Self::Audit(r) => r.sync = sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_record_ids_unique() {
        assert_ne!(new_record_id(), new_record_id());
    }

    #[test]
    fn test_transaction_new_stamps_timestamps() {
        let tx = Transaction::new(500, "groceries");
        assert!(tx.created_at > 0);
        assert_eq!(tx.created_at, tx.updated_at);
        assert!(tx.sync.is_none());
    }

    #[test]
    fn test_domain_record_round_trip() {
        let record = DomainRecord::Transaction(Transaction::new(1250, "coffee"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["record_type"], "transaction");

        let parsed: DomainRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.collection(), Collection::Transactions);
    }

    #[test]
    fn test_missing_updated_at_deserializes_as_zero() {
        let value = serde_json::json!({
            "record_type": "budget",
            "id": "b1",
            "name": "food",
            "limit_minor": 10_000,
            "period": "monthly",
            "created_at": 1000,
        });

        let parsed: DomainRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.updated_at(), 0);
    }

    #[test]
    fn test_accessors_cover_every_variant() {
        let records = [
            DomainRecord::Transaction(Transaction::new(1, "a")),
            DomainRecord::Budget(Budget::new("b", 1)),
            DomainRecord::Goal(Goal::new("g", 1)),
            DomainRecord::Trip(Trip::new("t", "EUR")),
            DomainRecord::TripExpense(TripExpense::new("t1", 1)),
            DomainRecord::Settlement(Settlement::new("alice", "bob", 1)),
            DomainRecord::Audit(AuditEntry::new("save", Collection::Budgets, "b1")),
        ];

        for mut record in records {
            assert!(!record.id().is_empty());
            record.set_updated_at(42);
            assert_eq!(record.updated_at(), 42);
        }
    }
}
