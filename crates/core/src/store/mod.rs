//! Storage abstraction for allocations and expenditures.
//!
//! The coordinator reads records through [`LedgerStore`] and hands back every
//! change of a unit of work as one [`ChangeSet`]. Backends apply a change set
//! all or nothing and reject it when any updated record's version no longer
//! matches the stored one.

pub mod memory;

use async_trait::async_trait;
use bursar_shared::types::{AllocationId, DepartmentId, ExpenditureId, FinancialYear};
use thiserror::Error;
use uuid::Uuid;

use crate::allocation::{Allocation, AllocationKey};
use crate::expenditure::Expenditure;

pub use memory::MemoryStore;

/// Errors reported by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record's version did not match at commit time.
    #[error("{entity} {id} was modified concurrently")]
    Conflict {
        /// Kind of record.
        entity: &'static str,
        /// ID of the record.
        id: Uuid,
    },

    /// A uniqueness constraint would be violated.
    #[error("Duplicate {0}")]
    Duplicate(String),

    /// The backend failed.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Records carrying an optimistic-concurrency version.
pub trait Versioned {
    /// Version the record was read at.
    fn version(&self) -> u64;

    /// Sets the version.
    fn set_version(&mut self, version: u64);
}

impl Versioned for Allocation {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Versioned for Expenditure {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// A staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write<T> {
    /// A new record, stored at its own version.
    Insert(T),
    /// A change to a record read at `version`; stored at `version + 1`.
    Update(T),
    /// Removal of a record read at `version`.
    Delete(T),
}

impl<T: Versioned> Write<T> {
    /// The record being written.
    pub fn record(&self) -> &T {
        match self {
            Self::Insert(record) | Self::Update(record) | Self::Delete(record) => record,
        }
    }

    /// The record as it reads once the write is committed, or `None` for a
    /// delete.
    #[must_use]
    pub fn into_committed(self) -> Option<T> {
        match self {
            Self::Insert(record) => Some(record),
            Self::Update(mut record) => {
                let next = record.version() + 1;
                record.set_version(next);
                Some(record)
            }
            Self::Delete(_) => None,
        }
    }
}

/// All writes of one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Allocation writes.
    pub allocations: Vec<Write<Allocation>>,
    /// Expenditure writes.
    pub expenditures: Vec<Write<Expenditure>>,
}

impl ChangeSet {
    /// Returns true if there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty() && self.expenditures.is_empty()
    }
}

/// Persistence for the ledger and expenditures.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Loads an allocation by ID.
    async fn allocation(&self, id: AllocationId) -> Result<Option<Allocation>, StoreError>;

    /// Loads the allocation for a department, budget head and year.
    async fn allocation_by_key(
        &self,
        key: &AllocationKey,
    ) -> Result<Option<Allocation>, StoreError>;

    /// Loads an expenditure by ID.
    async fn expenditure(&self, id: ExpenditureId) -> Result<Option<Expenditure>, StoreError>;

    /// Loads an expenditure by its bill number within a department and year.
    async fn expenditure_by_bill(
        &self,
        department_id: DepartmentId,
        bill_number: &str,
        financial_year: FinancialYear,
    ) -> Result<Option<Expenditure>, StoreError>;

    /// Number of expenditures filed against an allocation's key, in any
    /// status.
    async fn count_expenditures_for(&self, key: &AllocationKey) -> Result<u64, StoreError>;

    /// Applies every write or none of them.
    ///
    /// Deleting an allocation that an expenditure still references fails
    /// with [`StoreError::Conflict`].
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}
