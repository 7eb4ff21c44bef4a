//! Property-based tests for the allocation debit.

use bursar_shared::types::{BudgetHeadId, DepartmentId, FinancialYear, UserId};
use proptest::prelude::*;
use rust_decimal::Decimal;

use crate::allocation::error::LedgerError;
use crate::allocation::types::{Allocation, AllocationKey};

/// Strategy for amounts with two decimal places, up to 100,000.00.
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn allocation(allocated: Decimal) -> Allocation {
    let key = AllocationKey {
        department_id: DepartmentId::new(),
        budget_head_id: BudgetHeadId::new(),
        financial_year: FinancialYear::starting(2024),
    };
    Allocation::new(key, allocated, None, UserId::new())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Spent equals the sum of accepted debits and never exceeds allocated.
    #[test]
    fn prop_debits_conserve_budget(
        allocated in arb_amount(),
        debits in prop::collection::vec(arb_amount(), 0..30),
    ) {
        let mut a = allocation(allocated);
        let mut accepted = Decimal::ZERO;

        for amount in debits {
            let prior = a.spent_amount;
            match a.try_debit(amount, prior) {
                Ok(()) => accepted += amount,
                Err(LedgerError::BudgetExceeded { requested, remaining }) => {
                    prop_assert_eq!(requested, amount);
                    prop_assert!(amount > remaining);
                    prop_assert_eq!(a.spent_amount, prior);
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
            prop_assert!(a.spent_amount >= Decimal::ZERO);
            prop_assert!(a.spent_amount <= a.allocated_amount);
        }

        prop_assert_eq!(a.spent_amount, accepted);
    }

    /// A debit based on a stale spent amount never changes the allocation.
    #[test]
    fn prop_stale_expectation_is_rejected(
        allocated in arb_amount(),
        first in arb_amount(),
        second in arb_amount(),
    ) {
        let mut a = allocation(allocated);
        prop_assume!(first <= allocated);
        a.try_debit(first, Decimal::ZERO).unwrap();

        let before = a.clone();
        let result = a.try_debit(second, Decimal::ZERO);
        let is_stale = matches!(result, Err(LedgerError::ConcurrentModification { .. }));
        prop_assert!(is_stale);
        prop_assert_eq!(a, before);
    }

    /// Revisions never drop allocated below spent.
    #[test]
    fn prop_revision_keeps_spent_covered(
        allocated in arb_amount(),
        spent in arb_amount(),
        revised in arb_amount(),
    ) {
        prop_assume!(spent <= allocated);
        let mut a = allocation(allocated);
        a.try_debit(spent, Decimal::ZERO).unwrap();

        match a.revise_allocated(revised) {
            Ok(()) => prop_assert_eq!(a.allocated_amount, revised),
            Err(LedgerError::BelowSpent { .. }) => {
                prop_assert!(revised < spent);
                prop_assert_eq!(a.allocated_amount, allocated);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
        prop_assert!(a.spent_amount <= a.allocated_amount);
    }
}
