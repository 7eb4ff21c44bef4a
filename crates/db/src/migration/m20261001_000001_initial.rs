//! Initial database migration.
//!
//! Creates the allocations and expenditures tables. The constraints mirror
//! the checks the in-memory store applies on commit.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        db.execute_unprepared(ALLOCATIONS_SQL).await?;
        db.execute_unprepared(EXPENDITURES_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        db.execute_unprepared(DROP_SQL).await?;

        Ok(())
    }
}

const ALLOCATIONS_SQL: &str = r"
-- ============================================================
-- ALLOCATIONS
-- One budget per (department, budget head, financial year)
-- ============================================================

CREATE TABLE allocations (
    id UUID PRIMARY KEY,
    department_id UUID NOT NULL,
    budget_head_id UUID NOT NULL,
    financial_year VARCHAR(9) NOT NULL,
    allocated_amount NUMERIC(19, 4) NOT NULL,
    spent_amount NUMERIC(19, 4) NOT NULL DEFAULT 0,
    remarks TEXT,
    created_by UUID NOT NULL,
    last_modified_by UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version BIGINT NOT NULL DEFAULT 0,

    CONSTRAINT uq_allocations_key UNIQUE (department_id, budget_head_id, financial_year),
    CONSTRAINT chk_allocations_financial_year CHECK (financial_year ~ '^[0-9]{4}-[0-9]{4}$'),
    CONSTRAINT chk_allocations_allocated_non_negative CHECK (allocated_amount >= 0),
    CONSTRAINT chk_allocations_spent_non_negative CHECK (spent_amount >= 0),
    CONSTRAINT chk_allocations_spent_within_allocated CHECK (spent_amount <= allocated_amount),
    CONSTRAINT chk_allocations_version CHECK (version >= 0)
);
";

const EXPENDITURES_SQL: &str = r"
-- ============================================================
-- EXPENDITURES
-- Bills moving through the approval workflow
-- ============================================================

CREATE TABLE expenditures (
    id UUID PRIMARY KEY,
    department_id UUID NOT NULL,
    budget_head_id UUID NOT NULL,
    financial_year VARCHAR(9) NOT NULL,
    bill_number VARCHAR(100) NOT NULL,
    bill_date DATE NOT NULL,
    bill_amount NUMERIC(19, 4) NOT NULL,
    party_name VARCHAR(255) NOT NULL,
    expense_details TEXT NOT NULL,
    reference_budget_register_no VARCHAR(100),
    attachments JSONB NOT NULL DEFAULT '[]',
    status VARCHAR(16) NOT NULL,
    approver_index INTEGER,
    workflow JSONB NOT NULL,
    approval_history JSONB NOT NULL DEFAULT '[]',
    submitted_by UUID NOT NULL,
    resubmission_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    version BIGINT NOT NULL DEFAULT 0,

    CONSTRAINT uq_expenditures_bill UNIQUE (department_id, bill_number, financial_year),
    CONSTRAINT chk_expenditures_amount_positive CHECK (bill_amount > 0),
    CONSTRAINT chk_expenditures_status CHECK (status IN ('pending', 'verified', 'approved', 'rejected')),
    CONSTRAINT chk_expenditures_cursor CHECK (
        (status IN ('pending', 'verified')) = (approver_index IS NOT NULL)
    ),
    CONSTRAINT chk_expenditures_cursor_non_negative CHECK (approver_index >= 0),
    CONSTRAINT chk_expenditures_resubmissions CHECK (resubmission_count >= 0),
    CONSTRAINT chk_expenditures_version CHECK (version >= 0)
);

CREATE INDEX idx_expenditures_allocation
    ON expenditures (department_id, budget_head_id, financial_year);
CREATE INDEX idx_expenditures_open
    ON expenditures (status) WHERE status IN ('pending', 'verified');
";

const DROP_SQL: &str = r"
DROP TABLE IF EXISTS expenditures;
DROP TABLE IF EXISTS allocations;
";
