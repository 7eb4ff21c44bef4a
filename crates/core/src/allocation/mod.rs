//! Allocation ledger.
//!
//! Budget granted to a department per budget head and financial year, and
//! the only code path that moves `spent_amount`.
//!
//! # Modules
//!
//! - `types` - Allocation records and inputs
//! - `error` - Ledger error types
//! - `ledger` - Ledger service (create, revise, debit, delete, reads)

pub mod error;
pub mod ledger;
pub mod types;

#[cfg(test)]
mod ledger_props;

pub use error::LedgerError;
pub use ledger::AllocationLedger;
pub use types::{
    AMOUNT_SCALE, Allocation, AllocationKey, CreateAllocationInput, ReviseAllocationInput,
    fits_amount_scale,
};
