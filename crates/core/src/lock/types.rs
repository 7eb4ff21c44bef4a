//! Lock keys and status snapshots.

use std::fmt;

use bursar_shared::types::{AllocationId, ExpenditureId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resource key guarded by the lock manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(String);

impl LockKey {
    /// Key guarding an allocation's `spent_amount`.
    #[must_use]
    pub fn allocation(id: AllocationId) -> Self {
        Self(format!("allocation:{id}"))
    }

    /// Key guarding an expenditure's state.
    #[must_use]
    pub fn expenditure(id: ExpenditureId) -> Self {
        Self(format!("expenditure:{id}"))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Holder and acquisition time of a live lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// The locked resource.
    pub key: LockKey,
    /// Identity of the holder.
    pub holder: String,
    /// When the lock was acquired or last re-entered.
    pub locked_at: DateTime<Utc>,
}

/// A live lock as reported by [`ConcurrencyStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLock {
    /// The locked resource.
    pub key: LockKey,
    /// Identity of the holder.
    pub holder: String,
    /// When the lock was acquired or last re-entered.
    pub locked_at: DateTime<Utc>,
    /// Milliseconds since `locked_at`.
    pub age_ms: i64,
}

/// Snapshot of the lock table for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyStatus {
    /// Number of live locks.
    pub total_locks: usize,
    /// Live locks ordered by key.
    pub locks: Vec<ActiveLock>,
    /// True when expired records are waiting for the sweeper.
    pub cleanup_needed: bool,
}
