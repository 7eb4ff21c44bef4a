//! `SeaORM` Entity for allocations table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub department_id: Uuid,
    pub budget_head_id: Uuid,
    pub financial_year: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub allocated_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub spent_amount: Decimal,
    #[sea_orm(column_type = "Text", nullable)]
    pub remarks: Option<String>,
    pub created_by: Uuid,
    pub last_modified_by: Uuid,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
