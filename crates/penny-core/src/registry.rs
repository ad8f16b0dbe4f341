//! Collection policy registry
//!
//! Maps each collection to its sync tier and retention policy. Built once at
//! the composition root; adding a collection is a single registration here
//! instead of string matches scattered across services.

use std::collections::HashMap;

use crate::models::{Collection, SyncTier};

/// How long soft-deleted records of a collection are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Tombstones live this many days before permanent expiry
    Days(u32),
    /// Soft delete is refused; records must never silently disappear
    NonDeletable,
}

/// Per-collection sync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionPolicy {
    pub tier: SyncTier,
    pub retention: RetentionPolicy,
}

/// Static collection-to-policy mapping.
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    policies: HashMap<Collection, CollectionPolicy>,
    fallback: CollectionPolicy,
}

impl CollectionRegistry {
    /// The default policy set: vault and settlements are Critical and
    /// non-deletable, everyday money movement is High, plans are Normal,
    /// the audit trail is Low with a short retention.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            policies: HashMap::new(),
            fallback: CollectionPolicy {
                tier: SyncTier::Normal,
                retention: RetentionPolicy::Days(30),
            },
        };

        registry.register(
            Collection::Vault,
            CollectionPolicy {
                tier: SyncTier::Critical,
                retention: RetentionPolicy::NonDeletable,
            },
        );
        registry.register(
            Collection::Settlements,
            CollectionPolicy {
                tier: SyncTier::Critical,
                retention: RetentionPolicy::NonDeletable,
            },
        );
        registry.register(
            Collection::Transactions,
            CollectionPolicy {
                tier: SyncTier::High,
                retention: RetentionPolicy::Days(30),
            },
        );
        registry.register(
            Collection::Trips,
            CollectionPolicy {
                tier: SyncTier::High,
                retention: RetentionPolicy::Days(30),
            },
        );
        registry.register(
            Collection::TripExpenses,
            CollectionPolicy {
                tier: SyncTier::High,
                retention: RetentionPolicy::Days(30),
            },
        );
        registry.register(
            Collection::Budgets,
            CollectionPolicy {
                tier: SyncTier::Normal,
                retention: RetentionPolicy::Days(30),
            },
        );
        registry.register(
            Collection::Goals,
            CollectionPolicy {
                tier: SyncTier::Normal,
                retention: RetentionPolicy::Days(30),
            },
        );
        registry.register(
            Collection::AuditLog,
            CollectionPolicy {
                tier: SyncTier::Low,
                retention: RetentionPolicy::Days(7),
            },
        );

        registry
    }

    /// Register or replace the policy for a collection.
    pub fn register(&mut self, collection: Collection, policy: CollectionPolicy) {
        self.policies.insert(collection, policy);
    }

    #[must_use]
    pub fn policy(&self, collection: Collection) -> CollectionPolicy {
        self.policies
            .get(&collection)
            .copied()
            .unwrap_or(self.fallback)
    }

    #[must_use]
    pub fn tier(&self, collection: Collection) -> SyncTier {
        self.policy(collection).tier
    }

    #[must_use]
    pub fn retention(&self, collection: Collection) -> RetentionPolicy {
        self.policy(collection).retention
    }
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
