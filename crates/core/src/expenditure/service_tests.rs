//! Service-level tests: lifecycle, ledger consistency and races.

use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::actor::{Actor, ApproverRole, Role};
use crate::allocation::LedgerError;
use crate::expenditure::error::ExpenditureError;
use crate::expenditure::types::{
    Decision, ExpenditureState, ExpenditureStatus, ResubmitExpenditureInput,
};
use crate::external::{AuditEventKind, NotificationKind, Recipient};
use crate::lock::LockKey;
use crate::store::LedgerStore;
use crate::testing::{Fixture, RecordingNotifier};
use bursar_shared::types::UserId;

#[tokio::test]
async fn test_single_office_step_debits_on_approval() {
    let fx = Fixture::with_allocation(false, dec!(500000)).await;

    let e = fx.submit("INV-1", dec!(15000)).await;
    assert_eq!(e.state, ExpenditureState::Pending { approver_index: 0 });
    assert_eq!(e.workflow.steps(), &[ApproverRole::Office]);

    let approved = fx
        .service
        .approve_expenditure(&fx.office, e.id, Some("Within budget".into()))
        .await
        .unwrap();
    assert_eq!(approved.status(), ExpenditureStatus::Approved);

    let allocation = fx.allocation().await;
    assert_eq!(allocation.spent_amount, dec!(15000));
    assert_eq!(allocation.remaining_amount(), dec!(485000));
}

#[tokio::test]
async fn test_hod_step_forwards_without_debit() {
    let fx = Fixture::with_allocation(true, dec!(500000)).await;

    let e = fx.submit("INV-2", dec!(25000)).await;
    assert_eq!(e.workflow.steps(), &[ApproverRole::Hod, ApproverRole::Office]);

    let forwarded = fx
        .service
        .approve_expenditure(&fx.hod, e.id, None)
        .await
        .unwrap();
    assert_eq!(forwarded.state, ExpenditureState::Pending { approver_index: 1 });
    assert_eq!(fx.allocation().await.spent_amount, Decimal::ZERO);

    let approved = fx
        .service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap();
    assert_eq!(approved.state, ExpenditureState::Approved);
    assert_eq!(fx.allocation().await.spent_amount, dec!(25000));
}

#[tokio::test]
async fn test_submission_over_remaining_is_refused() {
    let fx = Fixture::with_allocation(false, dec!(40000)).await;

    let err = fx
        .service
        .submit_expenditure(&fx.submitter, fx.bill("INV-3", dec!(50000)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExpenditureError::Ledger(LedgerError::BudgetExceeded { requested, remaining })
            if requested == dec!(50000) && remaining == dec!(40000)
    ));
    assert_eq!(err.status_code(), 422);
    assert_eq!(fx.store.expenditure_count().await, 0);
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_final_approval_rechecks_budget() {
    let fx = Fixture::with_allocation(false, dec!(1000)).await;

    // Both fit at submission; only one fits at approval.
    let first = fx.submit("INV-A", dec!(700)).await;
    let second = fx.submit("INV-B", dec!(600)).await;

    fx.service
        .approve_expenditure(&fx.office, first.id, None)
        .await
        .unwrap();
    let err = fx
        .service
        .approve_expenditure(&fx.office, second.id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExpenditureError::Ledger(LedgerError::BudgetExceeded { .. })
    ));

    let unchanged = fx.service.expenditure(second.id).await.unwrap();
    assert_eq!(unchanged.state, ExpenditureState::Pending { approver_index: 0 });
    assert!(unchanged.approval_history.is_empty());
    assert_eq!(unchanged.version, second.version);
    assert_eq!(fx.allocation().await.spent_amount, dec!(700));
    assert_eq!(fx.service.concurrency_status().total_locks, 0);
}

#[tokio::test]
async fn test_reject_without_remarks_keeps_pending() {
    let fx = Fixture::new(false).await;
    let e = fx.submit("INV-4", dec!(100)).await;

    let err = fx
        .service
        .reject_expenditure(&fx.office, e.id, "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::RemarksRequired));
    assert_eq!(err.status_code(), 400);

    let stored = fx.service.expenditure(e.id).await.unwrap();
    assert_eq!(stored.status(), ExpenditureStatus::Pending);
}

#[tokio::test]
async fn test_concurrent_final_approvals_debit_once() {
    let fx = Fixture::with_allocation(false, dec!(1000)).await;
    let a = fx.submit("INV-5A", dec!(600)).await;
    let b = fx.submit("INV-5B", dec!(600)).await;
    let other_office = fx.second_office();

    let (ra, rb) = futures::join!(
        fx.service.approve_expenditure(&fx.office, a.id, None),
        fx.service.approve_expenditure(&other_office, b.id, None),
    );

    let results = [ra, rb];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            err.is_retryable()
                || matches!(err, ExpenditureError::Ledger(LedgerError::BudgetExceeded { .. })),
            "unexpected error: {err}"
        );
    }
    assert_eq!(fx.allocation().await.spent_amount, dec!(600));
}

#[tokio::test]
async fn test_racing_approvals_of_same_expenditure_debit_once() {
    let fx = Fixture::new(false).await;
    let e = fx.submit("INV-6", dec!(250)).await;
    let other_office = fx.second_office();

    let (r1, r2) = futures::join!(
        fx.service.approve_expenditure(&fx.office, e.id, None),
        fx.service.approve_expenditure(&other_office, e.id, None),
    );
    assert_eq!(usize::from(r1.is_ok()) + usize::from(r2.is_ok()), 1);

    let allocation = fx.allocation().await;
    assert_eq!(allocation.spent_amount, dec!(250));
    let stored = fx.service.expenditure(e.id).await.unwrap();
    let approvals = stored
        .approval_history
        .iter()
        .filter(|h| h.decision == Decision::Approve)
        .count();
    assert_eq!(approvals, 1);
}

#[tokio::test]
async fn test_retried_approval_is_refused() {
    let fx = Fixture::new(false).await;
    let e = fx.submit("INV-7", dec!(300)).await;

    fx.service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap();
    let err = fx
        .service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExpenditureError::InvalidTransition {
            from: ExpenditureStatus::Approved,
            action: Decision::Approve
        }
    ));
    assert_eq!(fx.allocation().await.spent_amount, dec!(300));
}

#[tokio::test]
async fn test_locked_allocation_is_busy_until_lock_expires() {
    let fx = Fixture::new(false).await;
    let e = fx.submit("INV-8", dec!(100)).await;

    // A crashed request left the allocation locked.
    let stale = fx
        .coordinator
        .locks()
        .acquire(&LockKey::allocation(fx.allocation_id), "crashed-request");
    assert!(stale);

    let err = fx
        .service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::ResourceBusy { .. }));
    assert_eq!(err.status_code(), 423);
    assert!(err.is_retryable());
    // The expenditure lock taken before the failure is not left behind.
    assert!(fx
        .coordinator
        .locks()
        .is_locked(&LockKey::expenditure(e.id))
        .is_none());

    fx.clock.advance(TimeDelta::seconds(301));
    let approved = fx
        .service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap();
    assert_eq!(approved.status(), ExpenditureStatus::Approved);
    assert_eq!(fx.service.concurrency_status().total_locks, 0);
}

#[tokio::test]
async fn test_resubmit_revalidates_amount() {
    let fx = Fixture::with_allocation(false, dec!(1000)).await;
    let e = fx.submit("INV-9", dec!(800)).await;
    fx.service
        .reject_expenditure(&fx.office, e.id, "Quote is too high")
        .await
        .unwrap();

    let too_much = ResubmitExpenditureInput {
        bill_amount: Some(dec!(1200)),
        ..ResubmitExpenditureInput::default()
    };
    let err = fx
        .service
        .resubmit_expenditure(&fx.submitter, e.id, too_much)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExpenditureError::Ledger(LedgerError::BudgetExceeded { .. })
    ));
    assert_eq!(
        fx.service.expenditure(e.id).await.unwrap().status(),
        ExpenditureStatus::Rejected
    );

    let reduced = ResubmitExpenditureInput {
        bill_amount: Some(dec!(650)),
        remarks: Some("New quote attached".into()),
        ..ResubmitExpenditureInput::default()
    };
    let resubmitted = fx
        .service
        .resubmit_expenditure(&fx.submitter, e.id, reduced)
        .await
        .unwrap();
    assert_eq!(resubmitted.id, e.id);
    assert_eq!(resubmitted.state, ExpenditureState::Pending { approver_index: 0 });
    assert_eq!(resubmitted.bill_amount, dec!(650));
    assert_eq!(resubmitted.resubmission_count, 1);
    assert_eq!(resubmitted.approval_history.len(), 2);

    fx.service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap();
    assert_eq!(fx.allocation().await.spent_amount, dec!(650));
}

#[tokio::test]
async fn test_resubmit_picks_up_new_department_head() {
    let fx = Fixture::new(false).await;
    let e = fx.submit("INV-10", dec!(100)).await;
    fx.service
        .reject_expenditure(&fx.office, e.id, "Needs HOD sign-off")
        .await
        .unwrap();

    fx.directory.set_head(fx.department_id, Some(fx.hod.user_id));
    let resubmitted = fx
        .service
        .resubmit_expenditure(&fx.submitter, e.id, ResubmitExpenditureInput::default())
        .await
        .unwrap();
    assert_eq!(resubmitted.current_approver(), Some(ApproverRole::Hod));

    let last = fx.notifier.sent().pop().unwrap();
    assert_eq!(last.recipient, Recipient::User(fx.hod.user_id));
    assert_eq!(last.kind, NotificationKind::ApprovalRequired);
}

#[tokio::test]
async fn test_verify_flow_notifies_next_approver() {
    let fx = Fixture::new(true).await;
    let e = fx.submit("INV-11", dec!(120)).await;

    let first = fx.notifier.sent().pop().unwrap();
    assert_eq!(first.recipient, Recipient::User(fx.hod.user_id));

    let verified = fx
        .service
        .verify_expenditure(&fx.hod, e.id, Some("Checked against indent".into()))
        .await
        .unwrap();
    assert_eq!(verified.state, ExpenditureState::Verified { approver_index: 1 });

    let next = fx.notifier.sent().pop().unwrap();
    assert_eq!(next.recipient, Recipient::Role(Role::Office));
    assert_eq!(next.kind, NotificationKind::ApprovalRequired);

    fx.service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap();
    let done = fx.notifier.sent().pop().unwrap();
    assert_eq!(done.recipient, Recipient::User(fx.submitter.user_id));
    assert_eq!(done.kind, NotificationKind::Approved);

    let kinds: Vec<_> = fx.audit.events().iter().map(|ev| ev.kind).collect();
    assert!(kinds.contains(&AuditEventKind::ExpenditureVerified));
    assert!(kinds.contains(&AuditEventKind::AllocationDebited));
}

#[tokio::test]
async fn test_duplicate_bill_in_same_year() {
    let fx = Fixture::new(false).await;
    fx.submit("INV-12", dec!(10)).await;

    let err = fx
        .service
        .submit_expenditure(&fx.submitter, fx.bill("INV-12", dec!(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::DuplicateBill { .. }));
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn test_submission_needs_allocation_for_bill_year() {
    let fx = Fixture::new(false).await;
    let mut input = fx.bill("INV-13", dec!(10));
    input.bill_date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();

    let err = fx
        .service
        .submit_expenditure(&fx.submitter, input)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExpenditureError::Ledger(LedgerError::NoAllocationFor(_))
    ));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_wrong_role_cannot_approve() {
    let fx = Fixture::new(false).await;
    let e = fx.submit("INV-14", dec!(10)).await;

    let err = fx
        .service
        .approve_expenditure(&fx.principal, e.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::WrongApprover { .. }));
    assert_eq!(fx.service.concurrency_status().total_locks, 0);

    let err = fx
        .service
        .approve_expenditure(&fx.office, bursar_shared::types::ExpenditureId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::ExpenditureNotFound(_)));
}

#[tokio::test]
async fn test_notification_failure_does_not_undo_approval() {
    let fx = Fixture::with_notifier(false, Arc::new(RecordingNotifier::failing())).await;
    let e = fx.submit("INV-15", dec!(40)).await;

    let approved = fx
        .service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap();
    assert_eq!(approved.status(), ExpenditureStatus::Approved);
    assert_eq!(fx.allocation().await.spent_amount, dec!(40));
}

#[tokio::test]
async fn test_only_department_users_submit() {
    let fx = Fixture::new(false).await;
    let err = fx
        .service
        .submit_expenditure(&fx.office, fx.bill("INV-16", dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::NotAuthorized(_)));

    let unassigned = Actor::new(UserId::new(), Role::Department);
    let err = fx
        .service
        .submit_expenditure(&unassigned, fx.bill("INV-16", dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::Validation(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_approvals_conserve_budget() {
    let fx = Arc::new(Fixture::with_allocation(false, dec!(1000)).await);
    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(fx.submit(&format!("PAR-{i}"), dec!(300)).await.id);
    }

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let fx = Arc::clone(&fx);
            tokio::spawn(async move {
                let office = fx.second_office();
                fx.service.approve_expenditure(&office, id, None).await
            })
        })
        .collect();

    let mut approved = Decimal::ZERO;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(e) => approved += e.bill_amount,
            Err(err) => assert!(
                err.is_retryable()
                    || matches!(err, ExpenditureError::Ledger(LedgerError::BudgetExceeded { .. })),
                "unexpected error: {err}"
            ),
        }
    }

    let allocation = fx.store.allocation(fx.allocation_id).await.unwrap().unwrap();
    assert_eq!(allocation.spent_amount, approved);
    assert!(allocation.spent_amount <= allocation.allocated_amount);
    assert_eq!(fx.service.concurrency_status().total_locks, 0);
}

#[tokio::test]
async fn test_store_failure_during_approval_commits_nothing() {
    let fx = Fixture::new(false).await;
    let e = fx.submit("INV-DB", dec!(400)).await;

    fx.faults.fail_commits(true);
    let err = fx
        .service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::Store(_)));
    assert!(err.is_fatal());
    assert!(!err.is_retryable());
    assert_eq!(err.status_code(), 500);
    assert_eq!(fx.service.concurrency_status().total_locks, 0);

    fx.faults.fail_commits(false);
    let stored = fx.service.expenditure(e.id).await.unwrap();
    assert_eq!(stored.state, ExpenditureState::Pending { approver_index: 0 });
    assert_eq!(fx.allocation().await.spent_amount, Decimal::ZERO);

    let approved = fx
        .service
        .approve_expenditure(&fx.office, e.id, None)
        .await
        .unwrap();
    assert_eq!(approved.status(), ExpenditureStatus::Approved);
}

#[tokio::test]
async fn test_store_read_failure_is_fatal() {
    let fx = Fixture::new(true).await;
    let e = fx.submit("INV-RD", dec!(50)).await;

    fx.faults.fail_reads(true);
    let err = fx
        .service
        .verify_expenditure(&fx.hod, e.id, None)
        .await
        .unwrap_err();
    assert!(err.is_fatal());

    let err = fx
        .service
        .submit_expenditure(&fx.submitter, fx.bill("INV-RD2", dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::Store(_)));
    fx.faults.fail_reads(false);

    assert_eq!(fx.store.expenditure_count().await, 1);
}

#[tokio::test]
async fn test_sub_scale_amount_is_refused_before_anything_is_stored() {
    let fx = Fixture::new(false).await;
    let err = fx
        .service
        .submit_expenditure(&fx.submitter, fx.bill("INV-TINY", dec!(0.00005)))
        .await
        .unwrap_err();
    assert!(matches!(err, ExpenditureError::Validation(_)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(fx.store.expenditure_count().await, 0);
    assert_eq!(fx.allocation().await.spent_amount, Decimal::ZERO);
}
