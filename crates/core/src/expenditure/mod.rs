//! Expenditure approval workflow.
//!
//! # Modules
//!
//! - `types` - Expenditure records, states and inputs
//! - `error` - Expenditure error types
//! - `machine` - Pure state transitions (submit, verify, approve, reject, resubmit)
//! - `service` - Orchestration over locks, units of work and collaborators

pub mod error;
pub mod machine;
pub mod service;
pub mod types;

#[cfg(test)]
mod machine_props;
#[cfg(test)]
mod service_tests;

pub use error::ExpenditureError;
pub use machine::{ApprovalOutcome, is_valid_transition};
pub use service::ExpenditureService;
pub use types::{
    ApprovalStep, Attachment, Decision, Expenditure, ExpenditureState, ExpenditureStatus,
    ResubmitExpenditureInput, SubmitExpenditureInput, Workflow,
};
