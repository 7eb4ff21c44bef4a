//! Transaction error types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::lock::{LockInfo, LockKey};
use crate::store::StoreError;

/// Errors raised while beginning or committing a unit of work.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// A lock needed by the unit is held by someone else.
    #[error("Resource {key} is locked by {held_by}")]
    ResourceBusy {
        /// The locked resource.
        key: LockKey,
        /// Holder of the lock.
        held_by: String,
        /// When the holder took the lock.
        locked_at: DateTime<Utc>,
    },

    /// A record changed between read and commit.
    #[error("{entity} {id} was modified concurrently")]
    Conflict {
        /// Kind of record.
        entity: &'static str,
        /// ID of the record.
        id: Uuid,
    },

    /// Commit would violate a uniqueness constraint.
    #[error("Duplicate {0}")]
    Duplicate(String),

    /// The store failed.
    #[error("Store error: {0}")]
    Store(String),
}

impl TransactionError {
    /// Returns true if retrying the whole unit may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceBusy { .. } | Self::Conflict { .. })
    }
}

impl From<LockInfo> for TransactionError {
    fn from(info: LockInfo) -> Self {
        Self::ResourceBusy {
            key: info.key,
            held_by: info.holder,
            locked_at: info.locked_at,
        }
    }
}

impl From<StoreError> for TransactionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { entity, id } => Self::Conflict { entity, id },
            StoreError::Duplicate(what) => Self::Duplicate(what),
            StoreError::Backend(msg) => Self::Store(msg),
        }
    }
}
