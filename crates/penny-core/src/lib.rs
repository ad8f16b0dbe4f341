//! # penny-core
//!
//! Offline-first data layer for Penny, a local-first personal finance
//! tracker. The local store is authoritative: every write lands there
//! first and always succeeds offline, then reconciles eventually with a
//! remote document store over an unreliable, rate-limited network.
//!
//! The moving parts:
//!
//! - [`rate_limit`]: sliding-window admission gate for outbound remote
//!   operations
//! - [`queue`]: tiered priority queues draining pending operations with
//!   retry and backoff
//! - [`tombstone`]: soft-delete lifecycle with restore, cross-device merge
//!   and expiry cleanup
//! - [`vault`]: PIN-derived encryption for the sensitive sub-ledger
//! - [`service`]: the local-first façade features call, owning merge and
//!   reconciliation
//! - [`store`] / [`remote`]: the local and remote storage ports and their
//!   implementations

pub mod connectivity;
pub mod error;
pub mod models;
pub mod queue;
pub mod rate_limit;
pub mod registry;
pub mod remote;
pub mod service;
pub mod store;
pub mod tombstone;
pub mod vault;

pub use connectivity::{Connectivity, NetworkClass};
pub use error::{Error, Result};
pub use models::{
    Collection, DomainRecord, QueuedOperation, SyncMetadata, SyncTier, TombstoneRecord,
};
pub use queue::{DrainOutcome, QueueConfig, SyncQueueEngine};
pub use rate_limit::SlidingWindowLimiter;
pub use registry::{CollectionPolicy, CollectionRegistry, RetentionPolicy};
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteChange, RemoteError, RemoteStore};
pub use service::{DataService, SyncReport};
pub use store::{LibSqlStore, LocalStore};
pub use tombstone::TombstoneService;
pub use vault::{EncryptedVaultRecord, VaultError, VaultPayload};
