//! Demo seeder for Bursar development.
//!
//! Creates an allocation for a demo department and walks one bill through
//! HOD verification and office approval against the configured database.
//! Running it again leaves existing demo data alone.
//!
//! Usage: cargo run --bin seeder

use std::sync::Arc;

use anyhow::Context;
use bursar_core::actor::{Actor, Role};
use bursar_core::allocation::{AllocationKey, AllocationLedger, CreateAllocationInput};
use bursar_core::expenditure::{ExpenditureService, SubmitExpenditureInput};
use bursar_core::external::{
    BudgetHeadInfo, DepartmentInfo, LogAuditSink, LogNotifier, StaticDirectory,
};
use bursar_core::lock::LockManager;
use bursar_core::store::LedgerStore;
use bursar_core::transaction::TransactionCoordinator;
use bursar_db::PgLedgerStore;
use bursar_shared::AppConfig;
use bursar_shared::types::{BudgetHeadId, DepartmentId, FinancialYear, UserId};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Demo department (consistent across runs)
const DEMO_DEPARTMENT_ID: Uuid = Uuid::from_u128(0x101);
/// Demo budget head
const DEMO_BUDGET_HEAD_ID: Uuid = Uuid::from_u128(0x102);
/// Head of the demo department
const DEMO_HOD_ID: Uuid = Uuid::from_u128(0x201);
/// Department clerk submitting bills
const DEMO_SUBMITTER_ID: Uuid = Uuid::from_u128(0x202);
/// Accounts office approver
const DEMO_OFFICE_ID: Uuid = Uuid::from_u128(0x203);

const DEMO_BILL_NUMBER: &str = "DEMO-0001";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bursar=debug,seeder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let db = bursar_db::connect_with(&config.database)
        .await
        .context("Failed to connect to database")?;
    info!(environment = %config.app.environment, "Connected to database");

    let store = Arc::new(PgLedgerStore::new(db));
    let locks = Arc::new(LockManager::from_config(&config.concurrency));
    let _sweeper = locks.spawn_sweeper(config.concurrency.sweep_interval());
    let coordinator = TransactionCoordinator::new(store.clone(), locks);

    let department_id = DepartmentId::from_uuid(DEMO_DEPARTMENT_ID);
    let budget_head_id = BudgetHeadId::from_uuid(DEMO_BUDGET_HEAD_ID);
    let hod_id = UserId::from_uuid(DEMO_HOD_ID);

    let directory = Arc::new(StaticDirectory::new());
    directory.add_department(DepartmentInfo {
        id: department_id,
        name: "Computer Science".into(),
        head_id: Some(hod_id),
    });
    directory.add_budget_head(BudgetHeadInfo {
        id: budget_head_id,
        name: "Laboratory Equipment".into(),
    });

    let audit = Arc::new(LogAuditSink);
    let ledger = AllocationLedger::new(coordinator.clone(), directory.clone(), audit.clone());
    let service = ExpenditureService::new(coordinator, directory, Arc::new(LogNotifier), audit);

    let office = Actor::new(UserId::from_uuid(DEMO_OFFICE_ID), Role::Office);
    let hod = Actor::new(hod_id, Role::Hod).in_department(department_id);
    let submitter =
        Actor::new(UserId::from_uuid(DEMO_SUBMITTER_ID), Role::Department).in_department(department_id);

    let today = Utc::now().date_naive();
    let financial_year = FinancialYear::containing(today)?;
    let key = AllocationKey {
        department_id,
        budget_head_id,
        financial_year,
    };

    let allocation = if let Some(existing) = ledger.find(&key).await? {
        info!(allocation_id = %existing.id, "Demo allocation already exists, skipping...");
        existing
    } else {
        let created = ledger
            .create_allocation(
                &office,
                CreateAllocationInput {
                    department_id,
                    budget_head_id,
                    financial_year,
                    allocated_amount: Decimal::new(500_000, 0),
                    remarks: Some("Demo allocation".into()),
                },
            )
            .await?;
        info!(allocation_id = %created.id, %financial_year, "Seeded demo allocation");
        created
    };

    if store
        .expenditure_by_bill(department_id, DEMO_BILL_NUMBER, financial_year)
        .await?
        .is_some()
    {
        info!(bill_number = DEMO_BILL_NUMBER, "Demo bill already exists, skipping...");
        return Ok(());
    }

    let submitted = service
        .submit_expenditure(
            &submitter,
            SubmitExpenditureInput {
                budget_head_id,
                bill_number: DEMO_BILL_NUMBER.into(),
                bill_date: today,
                bill_amount: Decimal::new(25_000, 0),
                party_name: "Campus Electronics".into(),
                expense_details: "Logic analysers for the embedded systems lab".into(),
                reference_budget_register_no: Some("BR-2024-017".into()),
                attachments: vec![],
            },
        )
        .await?;
    service
        .verify_expenditure(&hod, submitted.id, Some("Required for semester labs".into()))
        .await?;
    let approved = service
        .approve_expenditure(&office, submitted.id, Some("Within allocation".into()))
        .await?;

    let remaining = ledger.remaining(allocation.id).await?;
    let locks = service.concurrency_status();
    info!(
        expenditure_id = %approved.id,
        status = %approved.status(),
        remaining = %remaining,
        held_locks = locks.total_locks,
        "Seeding complete!"
    );

    Ok(())
}
