//! Postgres-backed ledger store.
//!
//! A change set is applied inside one database transaction. Updates are
//! conditional on the version the record was read at; a row that no longer
//! matches fails the whole commit with [`StoreError::Conflict`].

use async_trait::async_trait;
use bursar_core::allocation::{Allocation, AllocationKey};
use bursar_core::expenditure::{Expenditure, ExpenditureState, ExpenditureStatus};
use bursar_core::store::{ChangeSet, LedgerStore, StoreError, Write};
use bursar_shared::types::{
    AllocationId, BudgetHeadId, DepartmentId, ExpenditureId, FinancialYear, UserId,
};
use chrono::Utc;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, SqlErr, TransactionTrait,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::{allocations, expenditures};

/// Ledger store over a `SeaORM` connection.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    db: DatabaseConnection,
}

impl PgLedgerStore {
    /// Creates a store over an open connection.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn db_error(err: DbErr) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => StoreError::Duplicate(detail),
        _ => StoreError::Backend(err.to_string()),
    }
}

fn corrupt(table: &str, id: Uuid, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("corrupt {table} row {id}: {detail}"))
}

fn column<T, U>(value: T, name: &str) -> Result<U, StoreError>
where
    U: TryFrom<T>,
    T: Copy + std::fmt::Display,
{
    U::try_from(value).map_err(|_| StoreError::Backend(format!("{name} {value} is out of range")))
}

// ============================================================================
// Row conversions
// ============================================================================

pub(crate) fn allocation_from_model(model: allocations::Model) -> Result<Allocation, StoreError> {
    let financial_year: FinancialYear = model
        .financial_year
        .parse()
        .map_err(|err| corrupt("allocations", model.id, err))?;

    Ok(Allocation {
        id: AllocationId::from_uuid(model.id),
        key: AllocationKey {
            department_id: DepartmentId::from_uuid(model.department_id),
            budget_head_id: BudgetHeadId::from_uuid(model.budget_head_id),
            financial_year,
        },
        allocated_amount: model.allocated_amount,
        spent_amount: model.spent_amount,
        remarks: model.remarks,
        created_by: UserId::from_uuid(model.created_by),
        last_modified_by: UserId::from_uuid(model.last_modified_by),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
        version: column(model.version, "version")?,
    })
}

pub(crate) fn allocation_to_model(allocation: &Allocation) -> Result<allocations::Model, StoreError> {
    Ok(allocations::Model {
        id: allocation.id.into_inner(),
        department_id: allocation.key.department_id.into_inner(),
        budget_head_id: allocation.key.budget_head_id.into_inner(),
        financial_year: allocation.key.financial_year.to_string(),
        allocated_amount: allocation.allocated_amount,
        spent_amount: allocation.spent_amount,
        remarks: allocation.remarks.clone(),
        created_by: allocation.created_by.into_inner(),
        last_modified_by: allocation.last_modified_by.into_inner(),
        created_at: allocation.created_at.into(),
        updated_at: allocation.updated_at.into(),
        version: column(allocation.version, "version")?,
    })
}

fn allocation_active(model: allocations::Model) -> allocations::ActiveModel {
    allocations::ActiveModel {
        id: Set(model.id),
        department_id: Set(model.department_id),
        budget_head_id: Set(model.budget_head_id),
        financial_year: Set(model.financial_year),
        allocated_amount: Set(model.allocated_amount),
        spent_amount: Set(model.spent_amount),
        remarks: Set(model.remarks),
        created_by: Set(model.created_by),
        last_modified_by: Set(model.last_modified_by),
        created_at: Set(model.created_at),
        updated_at: Set(model.updated_at),
        version: Set(model.version),
    }
}

pub(crate) fn expenditure_from_model(
    model: expenditures::Model,
) -> Result<Expenditure, StoreError> {
    let id = model.id;
    let financial_year: FinancialYear = model
        .financial_year
        .parse()
        .map_err(|err| corrupt("expenditures", id, err))?;
    let status = ExpenditureStatus::parse(&model.status)
        .ok_or_else(|| corrupt("expenditures", id, format!("unknown status {}", model.status)))?;
    let approver_index = model
        .approver_index
        .map(|index| column::<i32, usize>(index, "approver_index"))
        .transpose()?;
    let state = ExpenditureState::from_parts(status, approver_index).ok_or_else(|| {
        corrupt(
            "expenditures",
            id,
            format!("status {status} does not match approver index {approver_index:?}"),
        )
    })?;

    Ok(Expenditure {
        id: ExpenditureId::from_uuid(id),
        department_id: DepartmentId::from_uuid(model.department_id),
        budget_head_id: BudgetHeadId::from_uuid(model.budget_head_id),
        financial_year,
        bill_number: model.bill_number,
        bill_date: model.bill_date,
        bill_amount: model.bill_amount,
        party_name: model.party_name,
        expense_details: model.expense_details,
        reference_budget_register_no: model.reference_budget_register_no,
        attachments: serde_json::from_value(model.attachments)
            .map_err(|err| corrupt("expenditures", id, err))?,
        state,
        workflow: serde_json::from_value(model.workflow)
            .map_err(|err| corrupt("expenditures", id, err))?,
        approval_history: serde_json::from_value(model.approval_history)
            .map_err(|err| corrupt("expenditures", id, err))?,
        submitted_by: UserId::from_uuid(model.submitted_by),
        resubmission_count: column(model.resubmission_count, "resubmission_count")?,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
        version: column(model.version, "version")?,
    })
}

pub(crate) fn expenditure_to_model(
    expenditure: &Expenditure,
) -> Result<expenditures::Model, StoreError> {
    let json = |value: serde_json::Result<serde_json::Value>| {
        value.map_err(|err| StoreError::Backend(err.to_string()))
    };

    Ok(expenditures::Model {
        id: expenditure.id.into_inner(),
        department_id: expenditure.department_id.into_inner(),
        budget_head_id: expenditure.budget_head_id.into_inner(),
        financial_year: expenditure.financial_year.to_string(),
        bill_number: expenditure.bill_number.clone(),
        bill_date: expenditure.bill_date,
        bill_amount: expenditure.bill_amount,
        party_name: expenditure.party_name.clone(),
        expense_details: expenditure.expense_details.clone(),
        reference_budget_register_no: expenditure.reference_budget_register_no.clone(),
        attachments: json(serde_json::to_value(&expenditure.attachments))?,
        status: expenditure.status().as_str().to_string(),
        approver_index: expenditure
            .state
            .approver_index()
            .map(|index| column::<usize, i32>(index, "approver_index"))
            .transpose()?,
        workflow: json(serde_json::to_value(&expenditure.workflow))?,
        approval_history: json(serde_json::to_value(&expenditure.approval_history))?,
        submitted_by: expenditure.submitted_by.into_inner(),
        resubmission_count: column(expenditure.resubmission_count, "resubmission_count")?,
        created_at: expenditure.created_at.into(),
        updated_at: expenditure.updated_at.into(),
        version: column(expenditure.version, "version")?,
    })
}

fn expenditure_active(model: expenditures::Model) -> expenditures::ActiveModel {
    expenditures::ActiveModel {
        id: Set(model.id),
        department_id: Set(model.department_id),
        budget_head_id: Set(model.budget_head_id),
        financial_year: Set(model.financial_year),
        bill_number: Set(model.bill_number),
        bill_date: Set(model.bill_date),
        bill_amount: Set(model.bill_amount),
        party_name: Set(model.party_name),
        expense_details: Set(model.expense_details),
        reference_budget_register_no: Set(model.reference_budget_register_no),
        attachments: Set(model.attachments),
        status: Set(model.status),
        approver_index: Set(model.approver_index),
        workflow: Set(model.workflow),
        approval_history: Set(model.approval_history),
        submitted_by: Set(model.submitted_by),
        resubmission_count: Set(model.resubmission_count),
        created_at: Set(model.created_at),
        updated_at: Set(model.updated_at),
        version: Set(model.version),
    }
}

// ============================================================================
// Writes
// ============================================================================

async fn write_allocation(
    txn: &DatabaseTransaction,
    write: Write<Allocation>,
) -> Result<(), StoreError> {
    match write {
        Write::Insert(allocation) => {
            let model = allocation_to_model(&allocation)?;
            allocations::Entity::insert(allocation_active(model))
                .exec(txn)
                .await
                .map_err(db_error)?;
        }
        Write::Update(allocation) => {
            let id = allocation.id.into_inner();
            let expected: i64 = column(allocation.version, "version")?;
            let mut committed = allocation;
            committed.version += 1;
            let mut model = allocation_active(allocation_to_model(&committed)?);
            model.id = NotSet;

            let result = allocations::Entity::update_many()
                .set(model)
                .filter(allocations::Column::Id.eq(id))
                .filter(allocations::Column::Version.eq(expected))
                .exec(txn)
                .await
                .map_err(db_error)?;

            if result.rows_affected == 0 {
                warn!(allocation_id = %id, version = expected, "Allocation version moved");
                return Err(StoreError::Conflict {
                    entity: "allocation",
                    id,
                });
            }
        }
        Write::Delete(allocation) => {
            let id = allocation.id.into_inner();
            let expected: i64 = column(allocation.version, "version")?;
            let result = allocations::Entity::delete_many()
                .filter(allocations::Column::Id.eq(id))
                .filter(allocations::Column::Version.eq(expected))
                .exec(txn)
                .await
                .map_err(db_error)?;

            if result.rows_affected == 0 {
                warn!(allocation_id = %id, version = expected, "Allocation version moved before delete");
                return Err(StoreError::Conflict {
                    entity: "allocation",
                    id,
                });
            }
        }
    }
    Ok(())
}

async fn write_expenditure(
    txn: &DatabaseTransaction,
    write: Write<Expenditure>,
) -> Result<(), StoreError> {
    match write {
        Write::Insert(expenditure) => {
            let model = expenditure_to_model(&expenditure)?;
            expenditures::Entity::insert(expenditure_active(model))
                .exec(txn)
                .await
                .map_err(db_error)?;
        }
        Write::Update(expenditure) => {
            let id = expenditure.id.into_inner();
            let expected: i64 = column(expenditure.version, "version")?;
            let mut committed = expenditure;
            committed.version += 1;
            let mut model = expenditure_active(expenditure_to_model(&committed)?);
            model.id = NotSet;

            let result = expenditures::Entity::update_many()
                .set(model)
                .filter(expenditures::Column::Id.eq(id))
                .filter(expenditures::Column::Version.eq(expected))
                .exec(txn)
                .await
                .map_err(db_error)?;

            if result.rows_affected == 0 {
                warn!(expenditure_id = %id, version = expected, "Expenditure version moved");
                return Err(StoreError::Conflict {
                    entity: "expenditure",
                    id,
                });
            }
        }
        Write::Delete(expenditure) => {
            let id = expenditure.id.into_inner();
            let expected: i64 = column(expenditure.version, "version")?;
            let result = expenditures::Entity::delete_many()
                .filter(expenditures::Column::Id.eq(id))
                .filter(expenditures::Column::Version.eq(expected))
                .exec(txn)
                .await
                .map_err(db_error)?;

            if result.rows_affected == 0 {
                return Err(StoreError::Conflict {
                    entity: "expenditure",
                    id,
                });
            }
        }
    }
    Ok(())
}

async fn count_for_key<C: ConnectionTrait>(db: &C, key: &AllocationKey) -> Result<u64, StoreError> {
    expenditures::Entity::find()
        .filter(expenditures::Column::DepartmentId.eq(key.department_id.into_inner()))
        .filter(expenditures::Column::BudgetHeadId.eq(key.budget_head_id.into_inner()))
        .filter(expenditures::Column::FinancialYear.eq(key.financial_year.to_string()))
        .count(db)
        .await
        .map_err(db_error)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn allocation(&self, id: AllocationId) -> Result<Option<Allocation>, StoreError> {
        allocations::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(allocation_from_model)
            .transpose()
    }

    async fn allocation_by_key(
        &self,
        key: &AllocationKey,
    ) -> Result<Option<Allocation>, StoreError> {
        allocations::Entity::find()
            .filter(allocations::Column::DepartmentId.eq(key.department_id.into_inner()))
            .filter(allocations::Column::BudgetHeadId.eq(key.budget_head_id.into_inner()))
            .filter(allocations::Column::FinancialYear.eq(key.financial_year.to_string()))
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(allocation_from_model)
            .transpose()
    }

    async fn expenditure(&self, id: ExpenditureId) -> Result<Option<Expenditure>, StoreError> {
        expenditures::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(expenditure_from_model)
            .transpose()
    }

    async fn expenditure_by_bill(
        &self,
        department_id: DepartmentId,
        bill_number: &str,
        financial_year: FinancialYear,
    ) -> Result<Option<Expenditure>, StoreError> {
        expenditures::Entity::find()
            .filter(expenditures::Column::DepartmentId.eq(department_id.into_inner()))
            .filter(expenditures::Column::BillNumber.eq(bill_number))
            .filter(expenditures::Column::FinancialYear.eq(financial_year.to_string()))
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(expenditure_from_model)
            .transpose()
    }

    async fn count_expenditures_for(&self, key: &AllocationKey) -> Result<u64, StoreError> {
        count_for_key(&self.db, key).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let allocation_writes = changes.allocations.len();
        let expenditure_writes = changes.expenditures.len();
        let deleted: Vec<(Uuid, AllocationKey)> = changes
            .allocations
            .iter()
            .filter_map(|w| match w {
                Write::Delete(a) => Some((a.id.into_inner(), a.key)),
                _ => None,
            })
            .collect();

        // Dropping the transaction on an early return rolls it back.
        let txn = self.db.begin().await.map_err(db_error)?;
        for write in changes.allocations {
            write_allocation(&txn, write).await?;
        }
        for write in changes.expenditures {
            write_expenditure(&txn, write).await?;
        }
        for (id, key) in &deleted {
            if count_for_key(&txn, key).await? > 0 {
                warn!(allocation_id = %id, "Deleted allocation is still referenced");
                return Err(StoreError::Conflict {
                    entity: "allocation",
                    id: *id,
                });
            }
        }
        txn.commit().await.map_err(db_error)?;

        debug!(allocation_writes, expenditure_writes, "Change set committed");
        Ok(())
    }
}
