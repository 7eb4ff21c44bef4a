//! Department and budget-head directory.

use async_trait::async_trait;
use bursar_shared::types::{BudgetHeadId, DepartmentId, UserId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A department as seen by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentInfo {
    /// Department ID.
    pub id: DepartmentId,
    /// Display name.
    pub name: String,
    /// Head of department, if one is assigned.
    pub head_id: Option<UserId>,
}

impl DepartmentInfo {
    /// Returns true if the department has a head, which adds an HOD step to
    /// its expenditure workflow.
    #[must_use]
    pub fn has_head(&self) -> bool {
        self.head_id.is_some()
    }
}

/// A budget head (spending category).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetHeadInfo {
    /// Budget head ID.
    pub id: BudgetHeadId,
    /// Display name.
    pub name: String,
}

/// Directory lookup failure.
#[derive(Debug, Error)]
#[error("Directory unavailable: {0}")]
pub struct DirectoryError(pub String);

/// Lookup of departments and budget heads.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Finds a department.
    async fn department(&self, id: DepartmentId) -> Result<Option<DepartmentInfo>, DirectoryError>;

    /// Finds a budget head.
    async fn budget_head(&self, id: BudgetHeadId) -> Result<Option<BudgetHeadInfo>, DirectoryError>;
}

/// Directory held in memory.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    departments: DashMap<DepartmentId, DepartmentInfo>,
    budget_heads: DashMap<BudgetHeadId, BudgetHeadInfo>,
}

impl StaticDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a department.
    pub fn add_department(&self, department: DepartmentInfo) {
        self.departments.insert(department.id, department);
    }

    /// Adds or replaces a budget head.
    pub fn add_budget_head(&self, budget_head: BudgetHeadInfo) {
        self.budget_heads.insert(budget_head.id, budget_head);
    }

    /// Assigns or clears a department's head.
    pub fn set_head(&self, department_id: DepartmentId, head_id: Option<UserId>) -> bool {
        match self.departments.get_mut(&department_id) {
            Some(mut department) => {
                department.head_id = head_id;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn department(&self, id: DepartmentId) -> Result<Option<DepartmentInfo>, DirectoryError> {
        Ok(self.departments.get(&id).map(|d| d.clone()))
    }

    async fn budget_head(&self, id: BudgetHeadId) -> Result<Option<BudgetHeadInfo>, DirectoryError> {
        Ok(self.budget_heads.get(&id).map(|b| b.clone()))
    }
}
