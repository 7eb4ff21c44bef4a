//! Property-based tests for the expenditure state machine.

use bursar_shared::types::{BudgetHeadId, DepartmentId, UserId};
use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;

use crate::actor::{Actor, Role};
use crate::expenditure::types::{
    Expenditure, ExpenditureState, ResubmitExpenditureInput, SubmitExpenditureInput, Workflow,
};
use crate::external::DepartmentInfo;

#[derive(Debug, Clone, Copy)]
enum Op {
    Approve(Role),
    Verify(Role),
    Reject(Role, bool),
    Resubmit(bool),
}

/// Strategy for actor roles.
fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::Department),
        Just(Role::Hod),
        Just(Role::Office),
        Just(Role::VicePrincipal),
        Just(Role::Principal),
        Just(Role::Admin),
    ]
}

/// Strategy for decisions attempted against an expenditure.
fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        arb_role().prop_map(Op::Approve),
        arb_role().prop_map(Op::Verify),
        (arb_role(), any::<bool>()).prop_map(|(role, remarks)| Op::Reject(role, remarks)),
        any::<bool>().prop_map(Op::Resubmit),
    ]
}

fn start(has_head: bool) -> (Expenditure, Actor, DepartmentId) {
    let department_id = DepartmentId::new();
    let department = DepartmentInfo {
        id: department_id,
        name: "Mathematics".into(),
        head_id: has_head.then(UserId::new),
    };
    let submitter = Actor::new(UserId::new(), Role::Department).in_department(department_id);
    let input = SubmitExpenditureInput {
        budget_head_id: BudgetHeadId::new(),
        bill_number: "B-1".into(),
        bill_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        bill_amount: Decimal::ONE_HUNDRED,
        party_name: "Vendor".into(),
        expense_details: "Chalk".into(),
        reference_budget_register_no: None,
        attachments: vec![],
    };
    let expenditure = Expenditure::submit(&submitter, input, &department).unwrap();
    (expenditure, submitter, department_id)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// History only grows, status moves only along valid transitions, the
    /// cursor only moves backwards on resubmission, and Approved is final.
    #[test]
    fn prop_transitions_are_monotonic(
        has_head in any::<bool>(),
        ops in prop::collection::vec(arb_op(), 1..25),
    ) {
        let (mut e, submitter, department_id) = start(has_head);

        for op in ops {
            let before = e.clone();
            let result = match op {
                Op::Approve(role) => {
                    let actor = Actor::new(UserId::new(), role).in_department(department_id);
                    e.approve(&actor, None).map(|_| ())
                }
                Op::Verify(role) => {
                    let actor = Actor::new(UserId::new(), role).in_department(department_id);
                    e.verify(&actor, None).map(|_| ())
                }
                Op::Reject(role, with_remarks) => {
                    let actor = Actor::new(UserId::new(), role).in_department(department_id);
                    e.reject(&actor, if with_remarks { "reason" } else { "" })
                }
                Op::Resubmit(same_submitter) => {
                    let actor = if same_submitter {
                        submitter.clone()
                    } else {
                        Actor::new(UserId::new(), Role::Department).in_department(department_id)
                    };
                    e.resubmit(&actor, ResubmitExpenditureInput::default(), Workflow::for_department(has_head))
                }
            };

            match result {
                Ok(()) => {
                    prop_assert_eq!(e.approval_history.len(), before.approval_history.len() + 1);
                    prop_assert!(before.status().can_transition_to(e.status()));
                    prop_assert!(before.state != ExpenditureState::Approved);

                    if let (Some(old), Some(new)) = (before.state.approver_index(), e.state.approver_index()) {
                        prop_assert!(new > old);
                    }
                    if matches!(op, Op::Reject(_, false)) {
                        prop_assert!(false, "rejection without remarks succeeded");
                    }
                }
                Err(_) => prop_assert_eq!(&e, &before),
            }
            prop_assert_eq!(e.approval_history[..before.approval_history.len()].to_vec(), before.approval_history.clone());
        }
    }
}
