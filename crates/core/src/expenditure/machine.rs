//! Expenditure approval state machine.
//!
//! Transitions are pure: they validate the actor and the current state,
//! append to the approval history and move the workflow cursor. The ledger
//! debit that accompanies final approval is applied by the service inside
//! the same unit of work.

use chrono::Utc;
use rust_decimal::Decimal;

use super::error::ExpenditureError;
use super::types::{
    ApprovalStep, Decision, Expenditure, ExpenditureState, ExpenditureStatus,
    ResubmitExpenditureInput, SubmitExpenditureInput, Workflow,
};
use crate::actor::{Actor, ApproverRole, Role};
use crate::allocation::{AMOUNT_SCALE, fits_amount_scale};
use crate::external::DepartmentInfo;
use bursar_shared::types::{ExpenditureId, FinancialYear};

/// Result of an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// More steps remain; the expenditure now waits for `next`.
    Forwarded {
        /// Role of the next step.
        next: ApproverRole,
    },
    /// The last step approved; the allocation must be debited.
    Final,
}

/// Returns true if an expenditure may move from `from` to `to`.
#[must_use]
pub fn is_valid_transition(from: ExpenditureStatus, to: ExpenditureStatus) -> bool {
    from.can_transition_to(to)
}

fn normalize_remarks(remarks: Option<String>) -> Option<String> {
    remarks
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

fn required(field: &str, value: &str) -> Result<String, ExpenditureError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ExpenditureError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn positive_amount(amount: Decimal) -> Result<Decimal, ExpenditureError> {
    if amount <= Decimal::ZERO {
        return Err(ExpenditureError::Validation(format!(
            "bill amount must be positive, got {amount}"
        )));
    }
    if !fits_amount_scale(amount) {
        return Err(ExpenditureError::Validation(format!(
            "bill amount {amount} has more than {AMOUNT_SCALE} decimal places"
        )));
    }
    Ok(amount)
}

impl Expenditure {
    /// Creates a pending expenditure for `actor`'s department.
    ///
    /// The workflow is fixed here: HOD then office when the department has a
    /// head, office alone otherwise. The financial year follows the bill
    /// date.
    pub fn submit(
        actor: &Actor,
        input: SubmitExpenditureInput,
        department: &DepartmentInfo,
    ) -> Result<Self, ExpenditureError> {
        if actor.role != Role::Department {
            return Err(ExpenditureError::NotAuthorized(format!(
                "role {} cannot submit expenditures",
                actor.role
            )));
        }
        match actor.department_id {
            None => {
                return Err(ExpenditureError::Validation(
                    "user is not assigned to a department".to_string(),
                ));
            }
            Some(id) if id != department.id => return Err(ExpenditureError::OutsideDepartment),
            Some(_) => {}
        }

        let bill_number = required("bill number", &input.bill_number)?;
        let party_name = required("party name", &input.party_name)?;
        let expense_details = required("expense details", &input.expense_details)?;
        let bill_amount = positive_amount(input.bill_amount)?;
        let financial_year = FinancialYear::containing(input.bill_date)
            .map_err(|err| ExpenditureError::Validation(format!("bill date: {err}")))?;

        let now = Utc::now();
        Ok(Self {
            id: ExpenditureId::new(),
            department_id: department.id,
            budget_head_id: input.budget_head_id,
            financial_year,
            bill_number,
            bill_date: input.bill_date,
            bill_amount,
            party_name,
            expense_details,
            reference_budget_register_no: normalize_remarks(input.reference_budget_register_no),
            attachments: input.attachments,
            state: ExpenditureState::Pending { approver_index: 0 },
            workflow: Workflow::for_department(department.has_head()),
            approval_history: Vec::new(),
            submitted_by: actor.user_id,
            resubmission_count: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    fn open_step(&self, action: Decision) -> Result<(usize, ApproverRole), ExpenditureError> {
        let invalid = || ExpenditureError::InvalidTransition {
            from: self.status(),
            action,
        };
        let index = self.state.approver_index().ok_or_else(invalid)?;
        let step = self.workflow.step(index).ok_or_else(invalid)?;
        Ok((index, step))
    }

    fn check_step_actor(&self, actor: &Actor, step: ApproverRole) -> Result<(), ExpenditureError> {
        if !actor.holds(step) {
            return Err(ExpenditureError::WrongApprover {
                expected: step,
                actual: actor.role,
            });
        }
        if step == ApproverRole::Hod && actor.department_id != Some(self.department_id) {
            return Err(ExpenditureError::OutsideDepartment);
        }
        Ok(())
    }

    fn push_history(&mut self, actor: &Actor, decision: Decision, remarks: Option<String>) {
        let at = Utc::now();
        self.approval_history.push(ApprovalStep {
            approver: actor.user_id,
            role: actor.role,
            decision,
            remarks,
            at,
        });
        self.updated_at = at;
    }

    /// Approves the current step.
    ///
    /// Forwards to the next approver, or reports [`ApprovalOutcome::Final`]
    /// after moving to `Approved` on the last step.
    pub fn approve(
        &mut self,
        actor: &Actor,
        remarks: Option<String>,
    ) -> Result<ApprovalOutcome, ExpenditureError> {
        let (index, step) = self.open_step(Decision::Approve)?;
        self.check_step_actor(actor, step)?;

        self.push_history(actor, Decision::Approve, normalize_remarks(remarks));
        let next_index = index + 1;
        match self.workflow.step(next_index) {
            Some(next) => {
                self.state = ExpenditureState::Pending {
                    approver_index: next_index,
                };
                Ok(ApprovalOutcome::Forwarded { next })
            }
            None => {
                self.state = ExpenditureState::Approved;
                Ok(ApprovalOutcome::Final)
            }
        }
    }

    /// Records HOD verification of the current step and forwards to the next
    /// approver. Only valid on a pending HOD step that is not the last one.
    pub fn verify(
        &mut self,
        actor: &Actor,
        remarks: Option<String>,
    ) -> Result<ApproverRole, ExpenditureError> {
        let invalid = ExpenditureError::InvalidTransition {
            from: self.status(),
            action: Decision::Verify,
        };
        let ExpenditureState::Pending { approver_index } = self.state else {
            return Err(invalid);
        };
        let next_index = approver_index + 1;
        let (Some(ApproverRole::Hod), Some(next)) = (
            self.workflow.step(approver_index),
            self.workflow.step(next_index),
        ) else {
            return Err(invalid);
        };
        self.check_step_actor(actor, ApproverRole::Hod)?;

        self.push_history(actor, Decision::Verify, normalize_remarks(remarks));
        self.state = ExpenditureState::Verified {
            approver_index: next_index,
        };
        Ok(next)
    }

    /// Rejects the expenditure. Remarks are mandatory.
    ///
    /// The current step's approver or an oversight role may reject.
    pub fn reject(&mut self, actor: &Actor, remarks: &str) -> Result<(), ExpenditureError> {
        let remarks = remarks.trim();
        if remarks.is_empty() {
            return Err(ExpenditureError::RemarksRequired);
        }
        let (_, step) = self.open_step(Decision::Reject)?;
        if !actor.role.is_oversight() {
            self.check_step_actor(actor, step)?;
        }

        self.push_history(actor, Decision::Reject, Some(remarks.to_string()));
        self.state = ExpenditureState::Rejected;
        Ok(())
    }

    /// Puts a rejected expenditure back at the first step of `workflow`,
    /// applying the submitter's changes.
    pub fn resubmit(
        &mut self,
        actor: &Actor,
        changes: ResubmitExpenditureInput,
        workflow: Workflow,
    ) -> Result<(), ExpenditureError> {
        if self.state != ExpenditureState::Rejected {
            return Err(ExpenditureError::InvalidTransition {
                from: self.status(),
                action: Decision::Resubmit,
            });
        }
        if actor.user_id != self.submitted_by {
            return Err(ExpenditureError::NotSubmitter);
        }

        // Validate everything before touching the record.
        let bill_number = changes
            .bill_number
            .as_deref()
            .map(|v| required("bill number", v))
            .transpose()?;
        let party_name = changes
            .party_name
            .as_deref()
            .map(|v| required("party name", v))
            .transpose()?;
        let expense_details = changes
            .expense_details
            .as_deref()
            .map(|v| required("expense details", v))
            .transpose()?;
        let bill_amount = changes.bill_amount.map(positive_amount).transpose()?;

        if let Some(bill_number) = bill_number {
            self.bill_number = bill_number;
        }
        if let Some(party_name) = party_name {
            self.party_name = party_name;
        }
        if let Some(expense_details) = expense_details {
            self.expense_details = expense_details;
        }
        if let Some(bill_amount) = bill_amount {
            self.bill_amount = bill_amount;
        }
        if let Some(reference) = changes.reference_budget_register_no {
            self.reference_budget_register_no = normalize_remarks(Some(reference));
        }
        if let Some(attachments) = changes.attachments {
            self.attachments = attachments;
        }

        self.workflow = workflow;
        self.resubmission_count += 1;
        self.push_history(actor, Decision::Resubmit, normalize_remarks(changes.remarks));
        self.state = ExpenditureState::Pending { approver_index: 0 };
        Ok(())
    }
}
