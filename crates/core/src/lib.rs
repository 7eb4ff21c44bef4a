//! Core budget-consumption logic for Bursar.
//!
//! This crate contains pure business logic with ZERO web or database dependencies.
//! Persistence, directory lookups, notifications and audit logging are reached
//! through traits so the same rules run against any backend.
//!
//! # Modules
//!
//! - `actor` - Authenticated actors and institutional roles
//! - `allocation` - Allocation ledger and the atomic debit
//! - `lock` - Process-wide lock manager with timeout-based expiry
//! - `expenditure` - Expenditure approval state machine and service
//! - `transaction` - Unit-of-work coordinator over the ledger store
//! - `store` - Storage abstraction and the in-memory backend
//! - `external` - Directory, notification and audit collaborators

pub mod actor;
pub mod allocation;
pub mod expenditure;
pub mod external;
pub mod lock;
pub mod store;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use actor::{Actor, ApproverRole, Role};
