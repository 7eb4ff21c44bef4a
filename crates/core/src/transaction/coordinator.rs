//! Lock acquisition and unit creation.

use std::sync::Arc;

use tracing::debug;

use super::error::TransactionError;
use super::unit::UnitOfWork;
use crate::lock::{LockKey, LockManager};
use crate::store::LedgerStore;

/// Starts units of work over a store, guarded by a lock manager.
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn LedgerStore>,
    locks: Arc<LockManager>,
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl TransactionCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, locks: Arc<LockManager>) -> Self {
        Self { store, locks }
    }

    /// The underlying store, for lock-free reads.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// The lock manager.
    #[must_use]
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Takes every key in order for `holder` and starts a unit of work.
    ///
    /// Never waits: if any key is held by someone else, the keys already
    /// taken are released and `ResourceBusy` is returned.
    pub fn begin(&self, keys: &[LockKey], holder: &str) -> Result<UnitOfWork, TransactionError> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            match self.locks.lock(key.clone(), holder) {
                Ok(guard) => guards.push(guard),
                Err(busy) => {
                    debug!(key = %busy.key, held_by = %busy.holder, holder, "Lock busy");
                    return Err(busy.into());
                }
            }
        }
        Ok(UnitOfWork::new(Arc::clone(&self.store), guards))
    }
}
