//! Expenditure service.
//!
//! Each operation checks its preconditions against a lock-free read, then
//! takes its locks, re-reads inside a unit of work, applies the transition
//! and commits. Notifications and audit events go out after the commit and
//! never undo it.

use std::sync::Arc;

use bursar_shared::types::{DepartmentId, ExpenditureId};
use tracing::{error, info, warn};

use super::error::ExpenditureError;
use super::machine::ApprovalOutcome;
use super::types::{
    Expenditure, ResubmitExpenditureInput, SubmitExpenditureInput, Workflow,
};
use crate::actor::{Actor, ApproverRole, Role};
use crate::allocation::{Allocation, LedgerError};
use crate::external::{
    AuditEvent, AuditEventKind, AuditSink, AuditTarget, DepartmentInfo, Directory, Notification,
    NotificationKind, Notifier, Recipient,
};
use crate::lock::{ConcurrencyStatus, LockKey};
use crate::transaction::{Committed, TransactionCoordinator, TransactionError};

/// Orchestrates the expenditure lifecycle over the ledger.
#[derive(Clone)]
pub struct ExpenditureService {
    coordinator: TransactionCoordinator,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for ExpenditureService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpenditureService")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

fn duplicate_bill(expenditure: &Expenditure) -> ExpenditureError {
    ExpenditureError::DuplicateBill {
        bill_number: expenditure.bill_number.clone(),
        financial_year: expenditure.financial_year.to_string(),
    }
}

fn commit_error(err: TransactionError, expenditure: &Expenditure) -> ExpenditureError {
    match err {
        TransactionError::Duplicate(_) => duplicate_bill(expenditure),
        other => other.into(),
    }
}

fn log_fatal(
    err: &ExpenditureError,
    operation: &'static str,
    actor: &Actor,
    expenditure_id: Option<ExpenditureId>,
) {
    if err.is_fatal() {
        error!(
            operation,
            actor_id = %actor.user_id,
            role = %actor.role,
            expenditure_id = ?expenditure_id,
            error = %err,
            "Expenditure operation failed"
        );
    }
}

fn committed_expenditure(
    committed: &Committed,
    id: ExpenditureId,
) -> Result<Expenditure, ExpenditureError> {
    committed
        .expenditure(id)
        .cloned()
        .ok_or(ExpenditureError::ExpenditureNotFound(id))
}

impl ExpenditureService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        coordinator: TransactionCoordinator,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            coordinator,
            directory,
            notifier,
            audit,
        }
    }

    async fn load(&self, id: ExpenditureId) -> Result<Expenditure, ExpenditureError> {
        self.coordinator
            .store()
            .expenditure(id)
            .await?
            .ok_or(ExpenditureError::ExpenditureNotFound(id))
    }

    /// Loads an expenditure.
    pub async fn expenditure(&self, id: ExpenditureId) -> Result<Expenditure, ExpenditureError> {
        self.load(id).await.inspect_err(|err| {
            if err.is_fatal() {
                error!(expenditure_id = %id, error = %err, "Failed to load expenditure");
            }
        })
    }

    /// Snapshot of the lock table.
    #[must_use]
    pub fn concurrency_status(&self) -> ConcurrencyStatus {
        self.coordinator.locks().status()
    }

    async fn department(&self, id: DepartmentId) -> Result<DepartmentInfo, ExpenditureError> {
        self.directory
            .department(id)
            .await?
            .ok_or(ExpenditureError::DepartmentNotFound(id))
    }

    async fn allocation_for(&self, expenditure: &Expenditure) -> Result<Allocation, ExpenditureError> {
        let key = expenditure.allocation_key();
        self.coordinator
            .store()
            .allocation_by_key(&key)
            .await?
            .ok_or(ExpenditureError::Ledger(LedgerError::NoAllocationFor(key)))
    }

    /// Advisory budget check. Final approval re-checks authoritatively.
    fn check_budget(allocation: &Allocation, amount: rust_decimal::Decimal) -> Result<(), ExpenditureError> {
        let remaining = allocation.remaining_amount();
        if amount > remaining {
            return Err(LedgerError::BudgetExceeded {
                requested: amount,
                remaining,
            }
            .into());
        }
        Ok(())
    }

    async fn check_unique_bill(&self, expenditure: &Expenditure) -> Result<(), ExpenditureError> {
        let existing = self
            .coordinator
            .store()
            .expenditure_by_bill(
                expenditure.department_id,
                &expenditure.bill_number,
                expenditure.financial_year,
            )
            .await?;
        match existing {
            Some(other) if other.id != expenditure.id => Err(duplicate_bill(expenditure)),
            _ => Ok(()),
        }
    }

    /// Submits a new expenditure for the actor's department.
    pub async fn submit_expenditure(
        &self,
        actor: &Actor,
        input: SubmitExpenditureInput,
    ) -> Result<Expenditure, ExpenditureError> {
        self.submit(actor, input)
            .await
            .inspect_err(|err| log_fatal(err, "submit", actor, None))
    }

    async fn submit(
        &self,
        actor: &Actor,
        input: SubmitExpenditureInput,
    ) -> Result<Expenditure, ExpenditureError> {
        if actor.role != Role::Department {
            return Err(ExpenditureError::NotAuthorized(format!(
                "role {} cannot submit expenditures",
                actor.role
            )));
        }
        let department_id = actor.department_id.ok_or_else(|| {
            ExpenditureError::Validation("user is not assigned to a department".to_string())
        })?;
        let department = self.department(department_id).await?;
        if self
            .directory
            .budget_head(input.budget_head_id)
            .await?
            .is_none()
        {
            return Err(ExpenditureError::BudgetHeadNotFound(input.budget_head_id));
        }

        let expenditure = Expenditure::submit(actor, input, &department)?;
        let allocation = self.allocation_for(&expenditure).await?;
        Self::check_budget(&allocation, expenditure.bill_amount)?;
        self.check_unique_bill(&expenditure).await?;

        let id = expenditure.id;
        let mut unit = self
            .coordinator
            .begin(&[LockKey::expenditure(id)], &actor.lock_holder())?;
        unit.run(|ws| {
            ws.insert_expenditure(expenditure.clone());
            Ok::<_, ExpenditureError>(())
        })?;
        let committed = unit
            .commit()
            .await
            .map_err(|err| commit_error(err, &expenditure))?;
        let submitted = committed_expenditure(&committed, id)?;

        info!(
            expenditure_id = %id,
            department_id = %submitted.department_id,
            amount = %submitted.bill_amount,
            financial_year = %submitted.financial_year,
            "Expenditure submitted"
        );

        if let Some(first) = submitted.current_approver() {
            let recipient = Self::recipient(first, Some(&department));
            self.notify(Notification {
                recipient,
                kind: NotificationKind::ApprovalRequired,
                expenditure_id: id,
                message: format!(
                    "Expenditure {} of {} from {} awaits {}",
                    submitted.bill_number, submitted.bill_amount, department.name, first
                ),
            })
            .await;
        }
        self.record(AuditEvent::new(
            AuditEventKind::ExpenditureSubmitted,
            actor,
            AuditTarget::Expenditure(id),
            None::<&Expenditure>,
            Some(&submitted),
        ))
        .await;

        Ok(submitted)
    }

    /// Records HOD verification and forwards to the next approver.
    pub async fn verify_expenditure(
        &self,
        actor: &Actor,
        id: ExpenditureId,
        remarks: Option<String>,
    ) -> Result<Expenditure, ExpenditureError> {
        self.verify(actor, id, remarks)
            .await
            .inspect_err(|err| log_fatal(err, "verify", actor, Some(id)))
    }

    async fn verify(
        &self,
        actor: &Actor,
        id: ExpenditureId,
        remarks: Option<String>,
    ) -> Result<Expenditure, ExpenditureError> {
        let mut preview = self.load(id).await?;
        preview.verify(actor, remarks.clone())?;

        let mut unit = self
            .coordinator
            .begin(&[LockKey::expenditure(id)], &actor.lock_holder())?;
        let before = unit
            .load_expenditure(id)
            .await?
            .ok_or(ExpenditureError::ExpenditureNotFound(id))?;

        let next = unit.run(|ws| {
            ws.expenditure_mut(id)
                .ok_or(ExpenditureError::ExpenditureNotFound(id))?
                .verify(actor, remarks)
        })?;
        let unit_id = unit.id();
        let committed = unit.commit().await.map_err(|err| commit_error(err, &before))?;
        let after = committed_expenditure(&committed, id)?;

        info!(expenditure_id = %id, %unit_id, next = %next, "Expenditure verified");

        self.notify_step(&after, next).await;
        self.record(AuditEvent::new(
            AuditEventKind::ExpenditureVerified,
            actor,
            AuditTarget::Expenditure(id),
            Some(&before),
            Some(&after),
        ))
        .await;

        Ok(after)
    }

    /// Approves the current step.
    ///
    /// On the last step the allocation is debited by the bill amount in the
    /// same unit of work; if the debit fails nothing is committed and the
    /// expenditure stays where it was.
    pub async fn approve_expenditure(
        &self,
        actor: &Actor,
        id: ExpenditureId,
        remarks: Option<String>,
    ) -> Result<Expenditure, ExpenditureError> {
        self.approve(actor, id, remarks)
            .await
            .inspect_err(|err| log_fatal(err, "approve", actor, Some(id)))
    }

    async fn approve(
        &self,
        actor: &Actor,
        id: ExpenditureId,
        remarks: Option<String>,
    ) -> Result<Expenditure, ExpenditureError> {
        let mut preview = self.load(id).await?;
        let allocation = self.allocation_for(&preview).await?;
        let allocation_id = allocation.id;
        // The debit must see the spent amount this decision was based on.
        let expected_prior_spent = allocation.spent_amount;
        preview.approve(actor, remarks.clone())?;

        let mut unit = self.coordinator.begin(
            &[LockKey::allocation(allocation_id), LockKey::expenditure(id)],
            &actor.lock_holder(),
        )?;
        let before = unit
            .load_expenditure(id)
            .await?
            .ok_or(ExpenditureError::ExpenditureNotFound(id))?;
        unit.load_allocation(allocation_id)
            .await?
            .ok_or(LedgerError::AllocationNotFound(allocation_id))?;

        let unit_id = unit.id();
        let outcome = unit.run(|ws| {
            let expenditure = ws
                .expenditure_mut(id)
                .ok_or(ExpenditureError::ExpenditureNotFound(id))?;
            let outcome = expenditure.approve(actor, remarks)?;
            let amount = expenditure.bill_amount;

            if outcome == ApprovalOutcome::Final {
                let allocation = ws
                    .allocation_mut(allocation_id)
                    .ok_or(LedgerError::AllocationNotFound(allocation_id))?;
                allocation.try_debit(amount, expected_prior_spent)?;
                allocation.mark_modified(actor.user_id);
            }
            Ok::<_, ExpenditureError>(outcome)
        });
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                info!(expenditure_id = %id, %unit_id, error = %err, "Approval aborted");
                unit.rollback();
                return Err(err);
            }
        };

        let committed = unit.commit().await.map_err(|err| commit_error(err, &before))?;
        let after = committed_expenditure(&committed, id)?;

        match outcome {
            ApprovalOutcome::Forwarded { next } => {
                info!(expenditure_id = %id, %unit_id, next = %next, "Expenditure forwarded");
                self.notify_step(&after, next).await;
            }
            ApprovalOutcome::Final => {
                let debited = committed.allocation(allocation_id);
                info!(
                    expenditure_id = %id,
                    %unit_id,
                    allocation_id = %allocation_id,
                    amount = %after.bill_amount,
                    spent = ?debited.map(|a| a.spent_amount),
                    "Expenditure approved and allocation debited"
                );
                self.notify(Notification {
                    recipient: Recipient::User(after.submitted_by),
                    kind: NotificationKind::Approved,
                    expenditure_id: id,
                    message: format!(
                        "Expenditure {} of {} has been approved",
                        after.bill_number, after.bill_amount
                    ),
                })
                .await;
                if let Some(debited) = debited {
                    self.record(AuditEvent::new(
                        AuditEventKind::AllocationDebited,
                        actor,
                        AuditTarget::Allocation(allocation_id),
                        Some(&allocation),
                        Some(debited),
                    ))
                    .await;
                }
            }
        }
        self.record(AuditEvent::new(
            AuditEventKind::ExpenditureApproved,
            actor,
            AuditTarget::Expenditure(id),
            Some(&before),
            Some(&after),
        ))
        .await;

        Ok(after)
    }

    /// Rejects the expenditure. Remarks are mandatory.
    pub async fn reject_expenditure(
        &self,
        actor: &Actor,
        id: ExpenditureId,
        remarks: &str,
    ) -> Result<Expenditure, ExpenditureError> {
        self.reject(actor, id, remarks)
            .await
            .inspect_err(|err| log_fatal(err, "reject", actor, Some(id)))
    }

    async fn reject(
        &self,
        actor: &Actor,
        id: ExpenditureId,
        remarks: &str,
    ) -> Result<Expenditure, ExpenditureError> {
        if remarks.trim().is_empty() {
            return Err(ExpenditureError::RemarksRequired);
        }
        let mut preview = self.load(id).await?;
        preview.reject(actor, remarks)?;

        let mut unit = self
            .coordinator
            .begin(&[LockKey::expenditure(id)], &actor.lock_holder())?;
        let before = unit
            .load_expenditure(id)
            .await?
            .ok_or(ExpenditureError::ExpenditureNotFound(id))?;

        unit.run(|ws| {
            ws.expenditure_mut(id)
                .ok_or(ExpenditureError::ExpenditureNotFound(id))?
                .reject(actor, remarks)
        })?;
        let unit_id = unit.id();
        let committed = unit.commit().await.map_err(|err| commit_error(err, &before))?;
        let after = committed_expenditure(&committed, id)?;

        info!(expenditure_id = %id, %unit_id, "Expenditure rejected");

        self.notify(Notification {
            recipient: Recipient::User(after.submitted_by),
            kind: NotificationKind::Rejected,
            expenditure_id: id,
            message: format!(
                "Expenditure {} has been rejected: {}",
                after.bill_number,
                remarks.trim()
            ),
        })
        .await;
        self.record(AuditEvent::new(
            AuditEventKind::ExpenditureRejected,
            actor,
            AuditTarget::Expenditure(id),
            Some(&before),
            Some(&after),
        ))
        .await;

        Ok(after)
    }

    /// Resubmits a rejected expenditure in place.
    ///
    /// The workflow is rebuilt from the department's current head assignment
    /// and the (possibly changed) amount is checked against the remaining
    /// budget again.
    pub async fn resubmit_expenditure(
        &self,
        actor: &Actor,
        id: ExpenditureId,
        changes: ResubmitExpenditureInput,
    ) -> Result<Expenditure, ExpenditureError> {
        self.resubmit(actor, id, changes)
            .await
            .inspect_err(|err| log_fatal(err, "resubmit", actor, Some(id)))
    }

    async fn resubmit(
        &self,
        actor: &Actor,
        id: ExpenditureId,
        changes: ResubmitExpenditureInput,
    ) -> Result<Expenditure, ExpenditureError> {
        let mut preview = self.load(id).await?;
        let department = self.department(preview.department_id).await?;
        let workflow = Workflow::for_department(department.has_head());
        preview.resubmit(actor, changes.clone(), workflow.clone())?;

        let allocation = self.allocation_for(&preview).await?;
        Self::check_budget(&allocation, preview.bill_amount)?;
        self.check_unique_bill(&preview).await?;

        let mut unit = self
            .coordinator
            .begin(&[LockKey::expenditure(id)], &actor.lock_holder())?;
        let before = unit
            .load_expenditure(id)
            .await?
            .ok_or(ExpenditureError::ExpenditureNotFound(id))?;

        unit.run(|ws| {
            ws.expenditure_mut(id)
                .ok_or(ExpenditureError::ExpenditureNotFound(id))?
                .resubmit(actor, changes, workflow)
        })?;
        let unit_id = unit.id();
        let committed = unit.commit().await.map_err(|err| commit_error(err, &preview))?;
        let after = committed_expenditure(&committed, id)?;

        info!(
            expenditure_id = %id,
            %unit_id,
            resubmission = after.resubmission_count,
            amount = %after.bill_amount,
            "Expenditure resubmitted"
        );

        if let Some(first) = after.current_approver() {
            self.notify(Notification {
                recipient: Self::recipient(first, Some(&department)),
                kind: NotificationKind::ApprovalRequired,
                expenditure_id: id,
                message: format!(
                    "Expenditure {} of {} was resubmitted and awaits {}",
                    after.bill_number, after.bill_amount, first
                ),
            })
            .await;
        }
        self.record(AuditEvent::new(
            AuditEventKind::ExpenditureResubmitted,
            actor,
            AuditTarget::Expenditure(id),
            Some(&before),
            Some(&after),
        ))
        .await;

        Ok(after)
    }

    /// The department head for HOD steps, the role otherwise.
    fn recipient(step: ApproverRole, department: Option<&DepartmentInfo>) -> Recipient {
        match (step, department.and_then(|d| d.head_id)) {
            (ApproverRole::Hod, Some(head)) => Recipient::User(head),
            _ => Recipient::Role(step.role()),
        }
    }

    async fn notify_step(&self, expenditure: &Expenditure, next: ApproverRole) {
        let department = if next == ApproverRole::Hod {
            self.directory
                .department(expenditure.department_id)
                .await
                .ok()
                .flatten()
        } else {
            None
        };
        self.notify(Notification {
            recipient: Self::recipient(next, department.as_ref()),
            kind: NotificationKind::ApprovalRequired,
            expenditure_id: expenditure.id,
            message: format!(
                "Expenditure {} of {} awaits {}",
                expenditure.bill_number, expenditure.bill_amount, next
            ),
        })
        .await;
    }

    async fn notify(&self, notification: Notification) {
        let expenditure_id = notification.expenditure_id;
        if let Err(err) = self.notifier.notify(notification).await {
            warn!(%expenditure_id, error = %err, "Failed to deliver notification");
        }
    }

    async fn record(&self, event: AuditEvent) {
        let kind = event.kind;
        if let Err(err) = self.audit.record(event).await {
            warn!(kind = kind.as_str(), error = %err, "Failed to record audit event");
        }
    }
}
