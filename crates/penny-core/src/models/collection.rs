//! Collection identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of syncable collections.
///
/// Routing (tier assignment, retention policy) is resolved through the
/// [`crate::registry::CollectionRegistry`], never by matching on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Transactions,
    Budgets,
    Goals,
    Trips,
    TripExpenses,
    Settlements,
    Vault,
    AuditLog,
}

impl Collection {
    /// All collections, in no particular order.
    pub const ALL: [Self; 8] = [
        Self::Transactions,
        Self::Budgets,
        Self::Goals,
        Self::Trips,
        Self::TripExpenses,
        Self::Settlements,
        Self::Vault,
        Self::AuditLog,
    ];

    /// The stable wire/storage name of this collection.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::Budgets => "budgets",
            Self::Goals => "goals",
            Self::Trips => "trips",
            Self::TripExpenses => "trip_expenses",
            Self::Settlements => "settlements",
            Self::Vault => "vault",
            Self::AuditLog => "audit_log",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transactions" => Ok(Self::Transactions),
            "budgets" => Ok(Self::Budgets),
            "goals" => Ok(Self::Goals),
            "trips" => Ok(Self::Trips),
            "trip_expenses" => Ok(Self::TripExpenses),
            "settlements" => Ok(Self::Settlements),
            "vault" => Ok(Self::Vault),
            "audit_log" => Ok(Self::AuditLog),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown collection: {other}"
            ))),
        }
    }
}
