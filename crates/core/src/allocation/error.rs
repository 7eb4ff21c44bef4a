//! Allocation ledger error types.

use bursar_shared::AppError;
use bursar_shared::types::{AllocationId, BudgetHeadId, DepartmentId};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::types::AllocationKey;
use crate::external::DirectoryError;
use crate::lock::LockKey;
use crate::store::StoreError;
use crate::transaction::TransactionError;

/// Errors that can occur in ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Allocation not found.
    #[error("Allocation {0} not found")]
    AllocationNotFound(AllocationId),

    /// No allocation exists for a department, budget head and year.
    #[error("No allocation found for {0}")]
    NoAllocationFor(AllocationKey),

    /// Department not found in the directory.
    #[error("Department {0} not found")]
    DepartmentNotFound(DepartmentId),

    /// Budget head not found in the directory.
    #[error("Budget head {0} not found")]
    BudgetHeadNotFound(BudgetHeadId),

    /// Amount is zero, negative, or otherwise unusable.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// The debit would take spending above the allocated amount.
    #[error("Insufficient budget: requested {requested}, remaining {remaining}")]
    BudgetExceeded {
        /// The amount requested.
        requested: Decimal,
        /// The amount still available.
        remaining: Decimal,
    },

    /// A revision would put the allocated amount below what is spent.
    #[error("Allocated amount {requested} is below spent amount {spent}")]
    BelowSpent {
        /// The requested allocated amount.
        requested: Decimal,
        /// The amount already spent.
        spent: Decimal,
    },

    /// The record changed after it was read.
    #[error("{entity} {id} has been modified by another request")]
    ConcurrentModification {
        /// Kind of record.
        entity: &'static str,
        /// ID of the record.
        id: Uuid,
    },

    /// Expenditures are still filed against the allocation.
    #[error("Allocation {id} cannot be deleted: {expenditures} expenditure(s) are filed against it")]
    AllocationInUse {
        /// The allocation.
        id: AllocationId,
        /// Number of referencing expenditures.
        expenditures: u64,
    },

    /// An allocation already exists for the key.
    #[error("Allocation already exists: {0}")]
    DuplicateAllocation(String),

    /// Actor may not perform the operation.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Another request holds the lock on the allocation.
    #[error("Resource {key} is currently locked by another user")]
    ResourceBusy {
        /// The locked resource.
        key: LockKey,
        /// Holder of the lock.
        held_by: String,
    },

    /// Storage backend failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidAmount(_) => 400,
            Self::NotAuthorized(_) => 403,
            Self::AllocationNotFound(_)
            | Self::NoAllocationFor(_)
            | Self::DepartmentNotFound(_)
            | Self::BudgetHeadNotFound(_) => 404,
            Self::ConcurrentModification { .. }
            | Self::DuplicateAllocation(_)
            | Self::AllocationInUse { .. } => 409,
            Self::BudgetExceeded { .. } | Self::BelowSpent { .. } => 422,
            Self::ResourceBusy { .. } => 423,
            Self::Store(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AllocationNotFound(_) | Self::NoAllocationFor(_) => "ALLOCATION_NOT_FOUND",
            Self::DepartmentNotFound(_) => "DEPARTMENT_NOT_FOUND",
            Self::BudgetHeadNotFound(_) => "BUDGET_HEAD_NOT_FOUND",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            Self::BelowSpent { .. } => "BELOW_SPENT",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::DuplicateAllocation(_) => "DUPLICATE_ALLOCATION",
            Self::AllocationInUse { .. } => "ALLOCATION_IN_USE",
            Self::NotAuthorized(_) => "FORBIDDEN",
            Self::ResourceBusy { .. } => "RESOURCE_LOCKED",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceBusy { .. } | Self::ConcurrentModification { .. }
        )
    }

    /// Returns true for backend failures the caller cannot act on.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<TransactionError> for LedgerError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::ResourceBusy { key, held_by, .. } => {
                Self::ResourceBusy { key, held_by }
            }
            TransactionError::Conflict { entity, id } => {
                Self::ConcurrentModification { entity, id }
            }
            TransactionError::Duplicate(what) => Self::DuplicateAllocation(what),
            TransactionError::Store(msg) => Self::Store(msg),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        TransactionError::from(err).into()
    }
}

impl From<DirectoryError> for LedgerError {
    fn from(err: DirectoryError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let msg = err.to_string();
        match err {
            LedgerError::InvalidAmount(_) => Self::Validation(msg),
            LedgerError::NotAuthorized(_) => Self::Forbidden(msg),
            LedgerError::AllocationNotFound(_)
            | LedgerError::NoAllocationFor(_)
            | LedgerError::DepartmentNotFound(_)
            | LedgerError::BudgetHeadNotFound(_) => Self::NotFound(msg),
            LedgerError::BudgetExceeded { .. } | LedgerError::BelowSpent { .. } => {
                Self::BusinessRule(msg)
            }
            LedgerError::ConcurrentModification { .. } => Self::ConcurrentModification(msg),
            LedgerError::DuplicateAllocation(_) | LedgerError::AllocationInUse { .. } => {
                Self::Conflict(msg)
            }
            LedgerError::ResourceBusy { .. } => Self::ResourceBusy(msg),
            LedgerError::Store(_) => Self::Database(msg),
        }
    }
}
