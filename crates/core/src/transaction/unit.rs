//! The unit of work.

use std::collections::HashMap;
use std::sync::Arc;

use bursar_shared::types::{AllocationId, ExpenditureId};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::error::TransactionError;
use crate::allocation::Allocation;
use crate::expenditure::Expenditure;
use crate::lock::LockGuard;
use crate::store::{ChangeSet, LedgerStore, StoreError, Write};

#[derive(Debug, Clone)]
struct Staged<T> {
    record: T,
    is_new: bool,
    dirty: bool,
    deleted: bool,
}

impl<T> Staged<T> {
    const fn loaded(record: T) -> Self {
        Self {
            record,
            is_new: false,
            dirty: false,
            deleted: false,
        }
    }

    const fn inserted(record: T) -> Self {
        Self {
            record,
            is_new: true,
            dirty: true,
            deleted: false,
        }
    }

    fn live(&self) -> Option<&T> {
        (!self.deleted).then_some(&self.record)
    }

    fn into_write(self) -> Option<Write<T>> {
        match (self.is_new, self.dirty, self.deleted) {
            (true, _, true) | (false, false, false) => None,
            (false, _, true) => Some(Write::Delete(self.record)),
            (true, _, false) => Some(Write::Insert(self.record)),
            (false, true, false) => Some(Write::Update(self.record)),
        }
    }
}

/// Records read or created by a unit of work.
///
/// Mutable access marks a record dirty; only dirty and new records reach the
/// change set.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    allocations: HashMap<AllocationId, Staged<Allocation>>,
    expenditures: HashMap<ExpenditureId, Staged<Expenditure>>,
}

impl WorkingSet {
    /// A loaded or staged allocation.
    #[must_use]
    pub fn allocation(&self, id: AllocationId) -> Option<&Allocation> {
        self.allocations.get(&id).and_then(Staged::live)
    }

    /// Mutable access to a loaded or staged allocation.
    pub fn allocation_mut(&mut self, id: AllocationId) -> Option<&mut Allocation> {
        self.allocations
            .get_mut(&id)
            .filter(|s| !s.deleted)
            .map(|s| {
                s.dirty = true;
                &mut s.record
            })
    }

    /// Stages the removal of a loaded allocation. Returns false if the
    /// allocation is not in the working set.
    pub fn delete_allocation(&mut self, id: AllocationId) -> bool {
        match self.allocations.get_mut(&id) {
            Some(staged) if !staged.deleted => {
                staged.deleted = true;
                true
            }
            _ => false,
        }
    }

    /// A loaded or staged expenditure.
    #[must_use]
    pub fn expenditure(&self, id: ExpenditureId) -> Option<&Expenditure> {
        self.expenditures.get(&id).and_then(Staged::live)
    }

    /// Mutable access to a loaded or staged expenditure.
    pub fn expenditure_mut(&mut self, id: ExpenditureId) -> Option<&mut Expenditure> {
        self.expenditures
            .get_mut(&id)
            .filter(|s| !s.deleted)
            .map(|s| {
                s.dirty = true;
                &mut s.record
            })
    }

    /// Stages a new allocation.
    pub fn insert_allocation(&mut self, allocation: Allocation) {
        self.allocations
            .insert(allocation.id, Staged::inserted(allocation));
    }

    /// Stages a new expenditure.
    pub fn insert_expenditure(&mut self, expenditure: Expenditure) {
        self.expenditures
            .insert(expenditure.id, Staged::inserted(expenditure));
    }

    fn into_change_set(self) -> ChangeSet {
        let mut allocations: Vec<_> = self
            .allocations
            .into_values()
            .filter_map(Staged::into_write)
            .collect();
        let mut expenditures: Vec<_> = self
            .expenditures
            .into_values()
            .filter_map(Staged::into_write)
            .collect();
        // Deterministic order keeps backend row locking consistent.
        allocations.sort_by_key(|w| w.record().id.into_inner());
        expenditures.sort_by_key(|w| w.record().id.into_inner());
        ChangeSet {
            allocations,
            expenditures,
        }
    }
}

/// Records as stored by a successful commit.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    /// Written allocations, at their new versions.
    pub allocations: Vec<Allocation>,
    /// Written expenditures, at their new versions.
    pub expenditures: Vec<Expenditure>,
    /// Allocations removed by the commit.
    pub deleted_allocations: Vec<AllocationId>,
}

impl Committed {
    /// The committed allocation with the given ID.
    #[must_use]
    pub fn allocation(&self, id: AllocationId) -> Option<&Allocation> {
        self.allocations.iter().find(|a| a.id == id)
    }

    /// The committed expenditure with the given ID.
    #[must_use]
    pub fn expenditure(&self, id: ExpenditureId) -> Option<&Expenditure> {
        self.expenditures.iter().find(|e| e.id == id)
    }
}

/// A read-check-write unit spanning allocations and expenditures.
///
/// Holds its locks until it is committed, rolled back or dropped. Dropping an
/// uncommitted unit discards its staged writes.
pub struct UnitOfWork {
    id: Uuid,
    store: Arc<dyn LedgerStore>,
    working: WorkingSet,
    _guards: Vec<LockGuard>,
    finished: bool,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("working", &self.working)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    pub(super) fn new(store: Arc<dyn LedgerStore>, guards: Vec<LockGuard>) -> Self {
        let id = Uuid::now_v7();
        debug!(unit_id = %id, locks = guards.len(), "Unit of work started");
        Self {
            id,
            store,
            working: WorkingSet::default(),
            _guards: guards,
            finished: false,
        }
    }

    /// Unit ID, for correlating log lines.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Read-only view of the working set.
    #[must_use]
    pub fn working_set(&self) -> &WorkingSet {
        &self.working
    }

    /// Loads an allocation into the working set and returns a snapshot of it.
    ///
    /// Records already in the working set are returned as staged.
    pub async fn load_allocation(
        &mut self,
        id: AllocationId,
    ) -> Result<Option<Allocation>, TransactionError> {
        if let Some(staged) = self.working.allocations.get(&id) {
            return Ok(staged.live().cloned());
        }
        let loaded = self.store.allocation(id).await.inspect_err(|err| {
            if matches!(err, StoreError::Backend(_)) {
                error!(unit_id = %self.id, allocation_id = %id, error = %err, "Failed to load allocation");
            }
        });
        let Some(allocation) = loaded? else {
            return Ok(None);
        };
        self.working
            .allocations
            .insert(id, Staged::loaded(allocation.clone()));
        Ok(Some(allocation))
    }

    /// Loads an expenditure into the working set and returns a snapshot of it.
    pub async fn load_expenditure(
        &mut self,
        id: ExpenditureId,
    ) -> Result<Option<Expenditure>, TransactionError> {
        if let Some(staged) = self.working.expenditures.get(&id) {
            return Ok(staged.live().cloned());
        }
        let loaded = self.store.expenditure(id).await.inspect_err(|err| {
            if matches!(err, StoreError::Backend(_)) {
                error!(unit_id = %self.id, expenditure_id = %id, error = %err, "Failed to load expenditure");
            }
        });
        let Some(expenditure) = loaded? else {
            return Ok(None);
        };
        self.working
            .expenditures
            .insert(id, Staged::loaded(expenditure.clone()));
        Ok(Some(expenditure))
    }

    /// Runs `steps` against a scratch copy of the working set.
    ///
    /// The copy replaces the working set only when `steps` succeeds, so a
    /// failing step discards every mutation made during the run.
    pub fn run<T, E, F>(&mut self, steps: F) -> Result<T, E>
    where
        F: FnOnce(&mut WorkingSet) -> Result<T, E>,
    {
        let mut scratch = self.working.clone();
        let value = steps(&mut scratch)?;
        self.working = scratch;
        Ok(value)
    }

    /// Writes every staged change to the store in one change set and
    /// releases the unit's locks.
    pub async fn commit(mut self) -> Result<Committed, TransactionError> {
        self.finished = true;
        let changes = std::mem::take(&mut self.working).into_change_set();
        if changes.is_empty() {
            debug!(unit_id = %self.id, "Unit of work committed with no changes");
            return Ok(Committed::default());
        }

        let allocations = changes.allocations.clone();
        let expenditures = changes.expenditures.clone();

        if let Err(err) = self.store.commit(changes).await {
            if matches!(err, StoreError::Backend(_)) {
                error!(
                    unit_id = %self.id,
                    allocation_ids = ?allocations.iter().map(|w| w.record().id).collect::<Vec<_>>(),
                    expenditure_ids = ?expenditures.iter().map(|w| w.record().id).collect::<Vec<_>>(),
                    error = %err,
                    "Store failed to commit unit of work"
                );
            } else {
                info!(unit_id = %self.id, error = %err, "Unit of work rolled back by store");
            }
            return Err(err.into());
        }

        info!(
            unit_id = %self.id,
            allocations = allocations.len(),
            expenditures = expenditures.len(),
            "Unit of work committed"
        );
        let deleted_allocations = allocations
            .iter()
            .filter(|w| matches!(w, Write::Delete(_)))
            .map(|w| w.record().id)
            .collect();
        Ok(Committed {
            allocations: allocations.into_iter().filter_map(Write::into_committed).collect(),
            expenditures: expenditures.into_iter().filter_map(Write::into_committed).collect(),
            deleted_allocations,
        })
    }

    /// Discards staged writes and releases the unit's locks.
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(unit_id = %self.id, "Unit of work rolled back");
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            debug!(unit_id = %self.id, "Unit of work dropped without commit");
        }
    }
}
