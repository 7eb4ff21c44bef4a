//! Unit-of-work coordination across the ledger and expenditures.
//!
//! A unit of work takes its locks up front, reads records into a private
//! working set, runs business steps against a scratch copy of that set, and
//! finally commits every staged write as one change set. Anything short of a
//! successful commit leaves the store untouched.
//!
//! # Modules
//!
//! - `coordinator` - Lock acquisition and unit creation
//! - `unit` - The unit of work and its working set
//! - `error` - Transaction error types

pub mod coordinator;
pub mod error;
pub mod unit;

pub use coordinator::TransactionCoordinator;
pub use error::TransactionError;
pub use unit::{Committed, UnitOfWork, WorkingSet};
