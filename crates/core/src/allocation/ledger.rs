//! The allocation ledger service.

use std::sync::Arc;

use bursar_shared::types::AllocationId;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use super::error::LedgerError;
use super::types::{
    Allocation, AllocationKey, CreateAllocationInput, ReviseAllocationInput, fits_amount_scale,
};
use crate::actor::Actor;
use crate::external::{AuditEvent, AuditEventKind, AuditSink, AuditTarget, Directory};
use crate::lock::LockKey;
use crate::transaction::TransactionCoordinator;

/// Owner of allocated and spent amounts.
///
/// Every write runs as a unit of work holding the allocation's lock, so
/// revisions, debits and deletion of one allocation never interleave.
#[derive(Clone)]
pub struct AllocationLedger {
    coordinator: TransactionCoordinator,
    directory: Arc<dyn Directory>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for AllocationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationLedger")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

fn check_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount < Decimal::ZERO || !fits_amount_scale(amount) {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(amount)
}

fn normalize_remarks(remarks: String) -> Option<String> {
    let remarks = remarks.trim();
    (!remarks.is_empty()).then(|| remarks.to_string())
}

fn log_fatal(err: &LedgerError, operation: &'static str, allocation_id: Option<AllocationId>) {
    if err.is_fatal() {
        error!(operation, allocation_id = ?allocation_id, error = %err, "Ledger operation failed");
    }
}

fn require_manager(actor: &Actor, action: &str) -> Result<(), LedgerError> {
    if actor.role.can_manage_allocations() {
        return Ok(());
    }
    Err(LedgerError::NotAuthorized(format!(
        "role {} cannot {action} allocations",
        actor.role
    )))
}

impl AllocationLedger {
    /// Creates a ledger.
    #[must_use]
    pub fn new(
        coordinator: TransactionCoordinator,
        directory: Arc<dyn Directory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            coordinator,
            directory,
            audit,
        }
    }

    async fn load(&self, id: AllocationId) -> Result<Allocation, LedgerError> {
        self.coordinator
            .store()
            .allocation(id)
            .await?
            .ok_or(LedgerError::AllocationNotFound(id))
    }

    /// Loads an allocation.
    pub async fn allocation(&self, id: AllocationId) -> Result<Allocation, LedgerError> {
        self.load(id)
            .await
            .inspect_err(|err| log_fatal(err, "load", Some(id)))
    }

    /// Finds the allocation for a department, budget head and year.
    pub async fn find(&self, key: &AllocationKey) -> Result<Option<Allocation>, LedgerError> {
        self.coordinator
            .store()
            .allocation_by_key(key)
            .await
            .map_err(LedgerError::from)
            .inspect_err(|err| log_fatal(err, "find", None))
    }

    /// Budget still available on an allocation.
    pub async fn remaining(&self, id: AllocationId) -> Result<Decimal, LedgerError> {
        Ok(self.allocation(id).await?.remaining_amount())
    }

    /// Creates an allocation.
    pub async fn create_allocation(
        &self,
        actor: &Actor,
        input: CreateAllocationInput,
    ) -> Result<Allocation, LedgerError> {
        self.create(actor, input)
            .await
            .inspect_err(|err| log_fatal(err, "create", None))
    }

    async fn create(
        &self,
        actor: &Actor,
        input: CreateAllocationInput,
    ) -> Result<Allocation, LedgerError> {
        require_manager(actor, "create")?;
        check_amount(input.allocated_amount)?;
        if self.directory.department(input.department_id).await?.is_none() {
            return Err(LedgerError::DepartmentNotFound(input.department_id));
        }
        if self
            .directory
            .budget_head(input.budget_head_id)
            .await?
            .is_none()
        {
            return Err(LedgerError::BudgetHeadNotFound(input.budget_head_id));
        }

        let key = input.key();
        if self.coordinator.store().allocation_by_key(&key).await?.is_some() {
            return Err(LedgerError::DuplicateAllocation(key.to_string()));
        }

        let allocation = Allocation::new(
            key,
            input.allocated_amount,
            input.remarks.and_then(normalize_remarks),
            actor.user_id,
        );

        // The store's uniqueness check settles a race between two creators.
        let mut unit = self.coordinator.begin(&[], &actor.lock_holder())?;
        unit.run(|ws| {
            ws.insert_allocation(allocation.clone());
            Ok::<_, LedgerError>(())
        })?;
        unit.commit().await?;

        info!(
            allocation_id = %allocation.id,
            department_id = %key.department_id,
            financial_year = %key.financial_year,
            amount = %allocation.allocated_amount,
            "Allocation created"
        );
        self.record(AuditEvent::new(
            AuditEventKind::AllocationCreated,
            actor,
            AuditTarget::Allocation(allocation.id),
            None::<&Allocation>,
            Some(&allocation),
        ))
        .await;

        Ok(allocation)
    }

    /// Changes an allocation's allocated amount and remarks.
    ///
    /// The allocated amount never drops below the spent amount.
    pub async fn revise_allocation(
        &self,
        actor: &Actor,
        id: AllocationId,
        changes: ReviseAllocationInput,
    ) -> Result<Allocation, LedgerError> {
        self.revise(actor, id, changes)
            .await
            .inspect_err(|err| log_fatal(err, "revise", Some(id)))
    }

    async fn revise(
        &self,
        actor: &Actor,
        id: AllocationId,
        changes: ReviseAllocationInput,
    ) -> Result<Allocation, LedgerError> {
        require_manager(actor, "revise")?;
        if let Some(amount) = changes.allocated_amount {
            check_amount(amount)?;
        }
        let current = self.load(id).await?;
        if changes.is_empty() {
            return Ok(current);
        }

        let mut unit = self
            .coordinator
            .begin(&[LockKey::allocation(id)], &actor.lock_holder())?;
        let before = unit
            .load_allocation(id)
            .await?
            .ok_or(LedgerError::AllocationNotFound(id))?;

        unit.run(|ws| {
            let allocation = ws
                .allocation_mut(id)
                .ok_or(LedgerError::AllocationNotFound(id))?;
            if let Some(amount) = changes.allocated_amount {
                allocation.revise_allocated(amount)?;
            }
            if let Some(remarks) = changes.remarks {
                allocation.remarks = normalize_remarks(remarks);
            }
            allocation.mark_modified(actor.user_id);
            Ok::<_, LedgerError>(())
        })?;

        let committed = unit.commit().await?;
        let after = committed
            .allocation(id)
            .cloned()
            .ok_or(LedgerError::AllocationNotFound(id))?;

        info!(
            allocation_id = %id,
            from = %before.allocated_amount,
            to = %after.allocated_amount,
            "Allocation revised"
        );
        self.record(AuditEvent::new(
            AuditEventKind::AllocationRevised,
            actor,
            AuditTarget::Allocation(id),
            Some(&before),
            Some(&after),
        ))
        .await;

        Ok(after)
    }

    /// Debits an allocation directly.
    ///
    /// Fails with `ConcurrentModification` when the current spent amount is
    /// not `expected_prior_spent`, and with `BudgetExceeded` when the debit
    /// would overspend. Expenditure approval applies the same debit inside
    /// its own unit of work instead of calling this.
    pub async fn try_debit(
        &self,
        actor: &Actor,
        id: AllocationId,
        amount: Decimal,
        expected_prior_spent: Decimal,
    ) -> Result<Allocation, LedgerError> {
        self.debit(actor, id, amount, expected_prior_spent)
            .await
            .inspect_err(|err| log_fatal(err, "debit", Some(id)))
    }

    async fn debit(
        &self,
        actor: &Actor,
        id: AllocationId,
        amount: Decimal,
        expected_prior_spent: Decimal,
    ) -> Result<Allocation, LedgerError> {
        require_manager(actor, "debit")?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        check_amount(amount)?;
        self.load(id).await?;

        let mut unit = self
            .coordinator
            .begin(&[LockKey::allocation(id)], &actor.lock_holder())?;
        let before = unit
            .load_allocation(id)
            .await?
            .ok_or(LedgerError::AllocationNotFound(id))?;

        unit.run(|ws| {
            let allocation = ws
                .allocation_mut(id)
                .ok_or(LedgerError::AllocationNotFound(id))?;
            allocation.try_debit(amount, expected_prior_spent)?;
            allocation.mark_modified(actor.user_id);
            Ok::<_, LedgerError>(())
        })?;

        let committed = unit.commit().await?;
        let after = committed
            .allocation(id)
            .cloned()
            .ok_or(LedgerError::AllocationNotFound(id))?;

        info!(allocation_id = %id, %amount, spent = %after.spent_amount, "Allocation debited");
        self.record(AuditEvent::new(
            AuditEventKind::AllocationDebited,
            actor,
            AuditTarget::Allocation(id),
            Some(&before),
            Some(&after),
        ))
        .await;

        Ok(after)
    }

    /// Deletes an allocation that no expenditure references.
    ///
    /// Expenditures in any status, rejected ones included, keep their
    /// allocation alive.
    pub async fn delete_allocation(
        &self,
        actor: &Actor,
        id: AllocationId,
    ) -> Result<Allocation, LedgerError> {
        self.delete(actor, id)
            .await
            .inspect_err(|err| log_fatal(err, "delete", Some(id)))
    }

    async fn delete(&self, actor: &Actor, id: AllocationId) -> Result<Allocation, LedgerError> {
        require_manager(actor, "delete")?;
        self.load(id).await?;

        let mut unit = self
            .coordinator
            .begin(&[LockKey::allocation(id)], &actor.lock_holder())?;
        let before = unit
            .load_allocation(id)
            .await?
            .ok_or(LedgerError::AllocationNotFound(id))?;

        let expenditures = self
            .coordinator
            .store()
            .count_expenditures_for(&before.key)
            .await?;
        if expenditures > 0 {
            return Err(LedgerError::AllocationInUse { id, expenditures });
        }

        unit.run(|ws| {
            if ws.delete_allocation(id) {
                Ok(())
            } else {
                Err(LedgerError::AllocationNotFound(id))
            }
        })?;
        unit.commit().await?;

        info!(
            allocation_id = %id,
            department_id = %before.key.department_id,
            financial_year = %before.key.financial_year,
            "Allocation deleted"
        );
        self.record(AuditEvent::new(
            AuditEventKind::AllocationDeleted,
            actor,
            AuditTarget::Allocation(id),
            Some(&before),
            None::<&Allocation>,
        ))
        .await;

        Ok(before)
    }

    async fn record(&self, event: AuditEvent) {
        let kind = event.kind;
        if let Err(err) = self.audit.record(event).await {
            warn!(kind = kind.as_str(), error = %err, "Failed to record audit event");
        }
    }
}
