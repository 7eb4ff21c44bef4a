//! Expenditure error types.

use bursar_shared::AppError;
use bursar_shared::types::{BudgetHeadId, DepartmentId, ExpenditureId};
use thiserror::Error;
use uuid::Uuid;

use super::types::{Decision, ExpenditureStatus};
use crate::actor::{ApproverRole, Role};
use crate::allocation::LedgerError;
use crate::external::DirectoryError;
use crate::lock::LockKey;
use crate::store::StoreError;
use crate::transaction::TransactionError;

/// Errors that can occur in expenditure operations.
#[derive(Debug, Error)]
pub enum ExpenditureError {
    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rejection without remarks.
    #[error("Remarks are required when rejecting an expenditure")]
    RemarksRequired,

    /// Expenditure not found.
    #[error("Expenditure {0} not found")]
    ExpenditureNotFound(ExpenditureId),

    /// Department not found in the directory.
    #[error("Department {0} not found")]
    DepartmentNotFound(DepartmentId),

    /// Budget head not found in the directory.
    #[error("Budget head {0} not found")]
    BudgetHeadNotFound(BudgetHeadId),

    /// Actor's role may not perform the operation.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Actor does not hold the role of the current workflow step.
    #[error("Expenditure is waiting for {expected}, not {actual}")]
    WrongApprover {
        /// Role of the current step.
        expected: ApproverRole,
        /// The actor's role.
        actual: Role,
    },

    /// Only the original submitter may resubmit.
    #[error("Only the original submitter can resubmit this expenditure")]
    NotSubmitter,

    /// HOD acting on another department's expenditure.
    #[error("Expenditure belongs to another department")]
    OutsideDepartment,

    /// The decision is not allowed in the current status.
    #[error("Cannot {action} an expenditure that is {from}")]
    InvalidTransition {
        /// Current status.
        from: ExpenditureStatus,
        /// Attempted decision.
        action: Decision,
    },

    /// Bill number already used in the department and financial year.
    #[error("Bill number {bill_number} already exists for {financial_year}")]
    DuplicateBill {
        /// The bill number.
        bill_number: String,
        /// The financial year, as `YYYY-YYYY`.
        financial_year: String,
    },

    /// Ledger failure: missing allocation or insufficient budget.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Another request holds a needed lock.
    #[error("Resource {key} is currently locked by another user")]
    ResourceBusy {
        /// The locked resource.
        key: LockKey,
        /// Holder of the lock.
        held_by: String,
    },

    /// A record changed between read and commit.
    #[error("{entity} {id} has been modified by another request")]
    ConcurrentModification {
        /// Kind of record.
        entity: &'static str,
        /// ID of the record.
        id: Uuid,
    },

    /// Storage backend failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl ExpenditureError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::RemarksRequired => 400,
            Self::NotAuthorized(_)
            | Self::WrongApprover { .. }
            | Self::NotSubmitter
            | Self::OutsideDepartment => 403,
            Self::ExpenditureNotFound(_)
            | Self::DepartmentNotFound(_)
            | Self::BudgetHeadNotFound(_) => 404,
            Self::InvalidTransition { .. }
            | Self::DuplicateBill { .. }
            | Self::ConcurrentModification { .. } => 409,
            Self::ResourceBusy { .. } => 423,
            Self::Ledger(err) => err.status_code(),
            Self::Store(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RemarksRequired => "REMARKS_REQUIRED",
            Self::ExpenditureNotFound(_) => "EXPENDITURE_NOT_FOUND",
            Self::DepartmentNotFound(_) => "DEPARTMENT_NOT_FOUND",
            Self::BudgetHeadNotFound(_) => "BUDGET_HEAD_NOT_FOUND",
            Self::NotAuthorized(_) | Self::NotSubmitter | Self::OutsideDepartment => "FORBIDDEN",
            Self::WrongApprover { .. } => "WRONG_APPROVER",
            Self::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::DuplicateBill { .. } => "DUPLICATE_BILL",
            Self::Ledger(err) => err.error_code(),
            Self::ResourceBusy { .. } => "RESOURCE_LOCKED",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ResourceBusy { .. } | Self::ConcurrentModification { .. } => true,
            Self::Ledger(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Returns true for backend failures the caller cannot act on.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Store(_) => true,
            Self::Ledger(err) => err.is_fatal(),
            _ => false,
        }
    }
}

impl From<TransactionError> for ExpenditureError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::ResourceBusy { key, held_by, .. } => {
                Self::ResourceBusy { key, held_by }
            }
            TransactionError::Conflict { entity, id } => {
                Self::ConcurrentModification { entity, id }
            }
            TransactionError::Duplicate(what) => Self::Validation(format!("duplicate {what}")),
            TransactionError::Store(msg) => Self::Store(msg),
        }
    }
}

impl From<StoreError> for ExpenditureError {
    fn from(err: StoreError) -> Self {
        TransactionError::from(err).into()
    }
}

impl From<DirectoryError> for ExpenditureError {
    fn from(err: DirectoryError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<ExpenditureError> for AppError {
    fn from(err: ExpenditureError) -> Self {
        if let ExpenditureError::Ledger(inner) = err {
            return inner.into();
        }
        let msg = err.to_string();
        match err {
            ExpenditureError::Validation(_) | ExpenditureError::RemarksRequired => {
                Self::Validation(msg)
            }
            ExpenditureError::NotAuthorized(_)
            | ExpenditureError::WrongApprover { .. }
            | ExpenditureError::NotSubmitter
            | ExpenditureError::OutsideDepartment => Self::Forbidden(msg),
            ExpenditureError::ExpenditureNotFound(_)
            | ExpenditureError::DepartmentNotFound(_)
            | ExpenditureError::BudgetHeadNotFound(_) => Self::NotFound(msg),
            ExpenditureError::InvalidTransition { .. } | ExpenditureError::DuplicateBill { .. } => {
                Self::Conflict(msg)
            }
            ExpenditureError::ConcurrentModification { .. } => Self::ConcurrentModification(msg),
            ExpenditureError::ResourceBusy { .. } => Self::ResourceBusy(msg),
            ExpenditureError::Store(_) | ExpenditureError::Ledger(_) => Self::Database(msg),
        }
    }
}
