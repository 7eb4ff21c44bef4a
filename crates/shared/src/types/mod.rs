//! Common types used across the application.

pub mod financial_year;
pub mod id;

pub use financial_year::{FinancialYear, FinancialYearError};
pub use id::*;
