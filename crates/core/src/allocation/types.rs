//! Allocation domain types.

use std::fmt;

use bursar_shared::types::{AllocationId, BudgetHeadId, DepartmentId, FinancialYear, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Decimal places money amounts are stored with.
pub const AMOUNT_SCALE: u32 = 4;

/// Returns true if `amount` needs no more than [`AMOUNT_SCALE`] decimal
/// places. Trailing zeros do not count.
#[must_use]
pub fn fits_amount_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= AMOUNT_SCALE
}

/// Natural key of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationKey {
    /// Department receiving the budget.
    pub department_id: DepartmentId,
    /// Budget head (category) of the allocation.
    pub budget_head_id: BudgetHeadId,
    /// Financial year the allocation covers.
    pub financial_year: FinancialYear,
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "department {} / budget head {} / {}",
            self.department_id, self.budget_head_id, self.financial_year
        )
    }
}

/// Budget granted to a department for one budget head and financial year.
///
/// `0 <= spent_amount <= allocated_amount` holds for every committed
/// allocation. `spent_amount` only moves through [`Allocation::try_debit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Allocation ID.
    pub id: AllocationId,
    /// Department, budget head and financial year.
    pub key: AllocationKey,
    /// Total budget granted.
    pub allocated_amount: Decimal,
    /// Sum of approved expenditure amounts.
    pub spent_amount: Decimal,
    /// Free-form remarks.
    pub remarks: Option<String>,
    /// User who created the allocation.
    pub created_by: UserId,
    /// User who last changed the allocation.
    pub last_modified_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change time.
    pub updated_at: DateTime<Utc>,
    /// Version read from the store; bumped on every committed change.
    pub version: u64,
}

impl Allocation {
    /// Creates a fresh allocation with nothing spent.
    #[must_use]
    pub fn new(
        key: AllocationKey,
        allocated_amount: Decimal,
        remarks: Option<String>,
        created_by: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AllocationId::new(),
            key,
            allocated_amount,
            spent_amount: Decimal::ZERO,
            remarks,
            created_by,
            last_modified_by: created_by,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Budget still available.
    #[must_use]
    pub fn remaining_amount(&self) -> Decimal {
        self.allocated_amount - self.spent_amount
    }

    /// Adds `amount` to `spent_amount`.
    ///
    /// `expected_prior_spent` is the spent amount the caller based its
    /// decision on; a different current value means someone else debited in
    /// between. On error the allocation is left untouched.
    pub fn try_debit(
        &mut self,
        amount: Decimal,
        expected_prior_spent: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO || !fits_amount_scale(amount) {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if self.spent_amount != expected_prior_spent {
            return Err(LedgerError::ConcurrentModification {
                entity: "allocation",
                id: self.id.into_inner(),
            });
        }
        let remaining = self.remaining_amount();
        if amount > remaining {
            return Err(LedgerError::BudgetExceeded {
                requested: amount,
                remaining,
            });
        }
        self.spent_amount += amount;
        Ok(())
    }

    /// Changes `allocated_amount`, never below what is already spent.
    pub fn revise_allocated(&mut self, new_allocated: Decimal) -> Result<(), LedgerError> {
        if new_allocated < Decimal::ZERO || !fits_amount_scale(new_allocated) {
            return Err(LedgerError::InvalidAmount(new_allocated));
        }
        if new_allocated < self.spent_amount {
            return Err(LedgerError::BelowSpent {
                requested: new_allocated,
                spent: self.spent_amount,
            });
        }
        self.allocated_amount = new_allocated;
        Ok(())
    }

    /// Records who changed the allocation and when.
    pub fn mark_modified(&mut self, by: UserId) {
        self.last_modified_by = by;
        self.updated_at = Utc::now();
    }
}

/// Input for creating an allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAllocationInput {
    /// Department receiving the budget.
    pub department_id: DepartmentId,
    /// Budget head of the allocation.
    pub budget_head_id: BudgetHeadId,
    /// Financial year covered.
    pub financial_year: FinancialYear,
    /// Budget granted.
    pub allocated_amount: Decimal,
    /// Optional remarks.
    pub remarks: Option<String>,
}

impl CreateAllocationInput {
    /// The natural key of the allocation to create.
    #[must_use]
    pub fn key(&self) -> AllocationKey {
        AllocationKey {
            department_id: self.department_id,
            budget_head_id: self.budget_head_id,
            financial_year: self.financial_year,
        }
    }
}

/// Changes to an allocation. Fields left `None` keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviseAllocationInput {
    /// New allocated amount.
    pub allocated_amount: Option<Decimal>,
    /// New remarks; a blank string clears them.
    pub remarks: Option<String>,
}

impl ReviseAllocationInput {
    /// Returns true if the input changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allocated_amount.is_none() && self.remarks.is_none()
    }
}
