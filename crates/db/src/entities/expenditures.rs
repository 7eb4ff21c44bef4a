//! `SeaORM` Entity for expenditures table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "expenditures")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub department_id: Uuid,
    pub budget_head_id: Uuid,
    pub financial_year: String,
    pub bill_number: String,
    pub bill_date: Date,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub bill_amount: Decimal,
    pub party_name: String,
    #[sea_orm(column_type = "Text")]
    pub expense_details: String,
    pub reference_budget_register_no: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub attachments: Json,
    pub status: String,
    pub approver_index: Option<i32>,
    #[sea_orm(column_type = "JsonBinary")]
    pub workflow: Json,
    #[sea_orm(column_type = "JsonBinary")]
    pub approval_history: Json,
    pub submitted_by: Uuid,
    pub resubmission_count: i32,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
