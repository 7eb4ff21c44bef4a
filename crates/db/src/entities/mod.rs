//! `SeaORM` entities.

pub mod allocations;
pub mod expenditures;
