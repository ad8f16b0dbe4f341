//! Data models shared across the sync layer

pub mod collection;
pub mod queue;
pub mod record;
pub mod tombstone;

pub use collection::Collection;
pub use queue::{Operation, QueuedOperation, SyncTier};
pub use record::{
    new_record_id, AuditEntry, Budget, ConflictStrategy, DomainRecord, Goal, Settlement,
    SyncMetadata, Transaction, Trip, TripExpense,
};
pub use tombstone::TombstoneRecord;
