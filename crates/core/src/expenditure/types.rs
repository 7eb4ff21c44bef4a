//! Expenditure domain types.
//!
//! An expenditure is a bill raised by a department against its allocation.
//! It moves through the approvers listed in its [`Workflow`]:
//! - Pending → Verified (HOD verification)
//! - Pending/Verified → Pending (approved, forwarded to the next approver)
//! - Pending/Verified → Approved (final approval, allocation debited)
//! - Pending/Verified → Rejected
//! - Rejected → Pending (resubmission)

use std::fmt;

use bursar_shared::types::{BudgetHeadId, DepartmentId, ExpenditureId, FinancialYear, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::actor::{ApproverRole, Role};
use crate::allocation::AllocationKey;

/// Coarse status of an expenditure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenditureStatus {
    /// Waiting for the current approver.
    Pending,
    /// Verified by the department head, waiting for the next approver.
    Verified,
    /// Finally approved; the allocation has been debited.
    Approved,
    /// Rejected; may be resubmitted by the submitter.
    Rejected,
}

impl ExpenditureStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parses a status from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "verified" => Some(Self::Verified),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Returns true if the expenditure is waiting for an approver.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Verified)
    }

    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Returns true if a transition from `self` to `target` is valid.
    ///
    /// Pending → Pending is the forward move between approvers.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending | Self::Verified, Self::Pending)
                | (Self::Pending, Self::Verified)
                | (Self::Pending | Self::Verified, Self::Approved | Self::Rejected)
                | (Self::Rejected, Self::Pending)
        )
    }
}

impl fmt::Display for ExpenditureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full state of an expenditure, including the workflow cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExpenditureState {
    /// Waiting for `workflow[approver_index]`.
    Pending {
        /// Cursor into the workflow.
        approver_index: usize,
    },
    /// Verified by the department head; waiting for `workflow[approver_index]`.
    Verified {
        /// Cursor into the workflow.
        approver_index: usize,
    },
    /// Finally approved.
    Approved,
    /// Rejected.
    Rejected,
}

impl ExpenditureState {
    /// Coarse status.
    #[must_use]
    pub const fn status(&self) -> ExpenditureStatus {
        match self {
            Self::Pending { .. } => ExpenditureStatus::Pending,
            Self::Verified { .. } => ExpenditureStatus::Verified,
            Self::Approved => ExpenditureStatus::Approved,
            Self::Rejected => ExpenditureStatus::Rejected,
        }
    }

    /// Workflow cursor, when an approver is expected.
    #[must_use]
    pub const fn approver_index(&self) -> Option<usize> {
        match self {
            Self::Pending { approver_index } | Self::Verified { approver_index } => {
                Some(*approver_index)
            }
            Self::Approved | Self::Rejected => None,
        }
    }

    /// Rebuilds the state from its persisted parts.
    #[must_use]
    pub const fn from_parts(
        status: ExpenditureStatus,
        approver_index: Option<usize>,
    ) -> Option<Self> {
        match (status, approver_index) {
            (ExpenditureStatus::Pending, Some(approver_index)) => {
                Some(Self::Pending { approver_index })
            }
            (ExpenditureStatus::Verified, Some(approver_index)) => {
                Some(Self::Verified { approver_index })
            }
            (ExpenditureStatus::Approved, None) => Some(Self::Approved),
            (ExpenditureStatus::Rejected, None) => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Ordered approver roles, fixed when the expenditure is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow(Vec<ApproverRole>);

impl Workflow {
    /// Workflow for a department: HOD then office when the department has a
    /// head, office alone otherwise.
    #[must_use]
    pub fn for_department(has_head: bool) -> Self {
        if has_head {
            Self(vec![ApproverRole::Hod, ApproverRole::Office])
        } else {
            Self(vec![ApproverRole::Office])
        }
    }

    /// Creates a workflow from explicit steps.
    #[must_use]
    pub fn from_steps(steps: Vec<ApproverRole>) -> Self {
        Self(steps)
    }

    /// The steps in order.
    #[must_use]
    pub fn steps(&self) -> &[ApproverRole] {
        &self.0
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the workflow has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Role at step `index`.
    #[must_use]
    pub fn step(&self, index: usize) -> Option<ApproverRole> {
        self.0.get(index).copied()
    }

    /// Returns true if `index` is the last step.
    #[must_use]
    pub fn is_final(&self, index: usize) -> bool {
        index + 1 == self.0.len()
    }
}

/// Decision recorded in the approval history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// HOD verification.
    Verify,
    /// Approval of a step.
    Approve,
    /// Rejection.
    Reject,
    /// Resubmission after rejection.
    Resubmit,
}

impl Decision {
    /// Returns the string representation of the decision.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Resubmit => "resubmit",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only approval history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    /// Who acted.
    pub approver: UserId,
    /// Role the actor held.
    pub role: Role,
    /// What they decided.
    pub decision: Decision,
    /// Remarks given with the decision.
    pub remarks: Option<String>,
    /// When.
    pub at: DateTime<Utc>,
}

/// Opaque descriptor of a stored attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Original file name.
    pub filename: String,
    /// Location in attachment storage.
    pub url: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub size: u64,
}

/// A bill submitted against a department's allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expenditure {
    /// Expenditure ID.
    pub id: ExpenditureId,
    /// Submitting department.
    pub department_id: DepartmentId,
    /// Budget head charged.
    pub budget_head_id: BudgetHeadId,
    /// Financial year derived from the bill date.
    pub financial_year: FinancialYear,
    /// Bill number, unique per department and financial year.
    pub bill_number: String,
    /// Date on the bill.
    pub bill_date: NaiveDate,
    /// Amount of the bill.
    pub bill_amount: Decimal,
    /// Vendor or payee.
    pub party_name: String,
    /// What the money was spent on.
    pub expense_details: String,
    /// Entry in the paper budget register, if any.
    pub reference_budget_register_no: Option<String>,
    /// Supporting documents.
    pub attachments: Vec<Attachment>,
    /// Lifecycle state.
    pub state: ExpenditureState,
    /// Approver roles in order.
    pub workflow: Workflow,
    /// Append-only decision log.
    pub approval_history: Vec<ApprovalStep>,
    /// Submitting user.
    pub submitted_by: UserId,
    /// Number of times the expenditure was resubmitted.
    pub resubmission_count: u32,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last change time.
    pub updated_at: DateTime<Utc>,
    /// Version read from the store; bumped on every committed change.
    pub version: u64,
}

impl Expenditure {
    /// Coarse status.
    #[must_use]
    pub fn status(&self) -> ExpenditureStatus {
        self.state.status()
    }

    /// Role expected to act next, if any.
    #[must_use]
    pub fn current_approver(&self) -> Option<ApproverRole> {
        self.state
            .approver_index()
            .and_then(|index| self.workflow.step(index))
    }

    /// Key of the allocation this expenditure draws on.
    #[must_use]
    pub fn allocation_key(&self) -> AllocationKey {
        AllocationKey {
            department_id: self.department_id,
            budget_head_id: self.budget_head_id,
            financial_year: self.financial_year,
        }
    }
}

/// Input for submitting an expenditure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExpenditureInput {
    /// Budget head to charge.
    pub budget_head_id: BudgetHeadId,
    /// Bill number.
    pub bill_number: String,
    /// Date on the bill.
    pub bill_date: NaiveDate,
    /// Amount of the bill.
    pub bill_amount: Decimal,
    /// Vendor or payee.
    pub party_name: String,
    /// What the money was spent on.
    pub expense_details: String,
    /// Budget register reference.
    #[serde(default)]
    pub reference_budget_register_no: Option<String>,
    /// Supporting documents.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Changes applied when a rejected expenditure is resubmitted.
///
/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResubmitExpenditureInput {
    /// New bill number.
    pub bill_number: Option<String>,
    /// New bill amount.
    pub bill_amount: Option<Decimal>,
    /// New payee.
    pub party_name: Option<String>,
    /// New description.
    pub expense_details: Option<String>,
    /// New budget register reference.
    pub reference_budget_register_no: Option<String>,
    /// Replacement attachments.
    pub attachments: Option<Vec<Attachment>>,
    /// Note explaining the resubmission.
    pub remarks: Option<String>,
}
