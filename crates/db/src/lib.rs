//! Postgres persistence for Bursar.
//!
//! This crate provides:
//! - `SeaORM` entity definitions for allocations and expenditures
//! - Database migrations
//! - [`PgLedgerStore`], the durable [`bursar_core::store::LedgerStore`]

pub mod entities;
pub mod migration;
pub mod store;

pub use store::PgLedgerStore;

use std::time::Duration;

use bursar_shared::config::DatabaseConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

/// Establishes a connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}

/// Establishes a pooled connection using the database settings.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect_with(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    Database::connect(options).await
}
