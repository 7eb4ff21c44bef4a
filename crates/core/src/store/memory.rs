//! In-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use bursar_shared::types::{AllocationId, DepartmentId, ExpenditureId, FinancialYear};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{ChangeSet, LedgerStore, StoreError, Versioned, Write};
use crate::allocation::{Allocation, AllocationKey};
use crate::expenditure::Expenditure;

#[derive(Debug, Clone, Default)]
struct Tables {
    allocations: HashMap<AllocationId, Allocation>,
    expenditures: HashMap<ExpenditureId, Expenditure>,
}

impl Tables {
    fn apply_allocation(&mut self, write: Write<Allocation>) -> Result<(), StoreError> {
        let record = write.record();
        let id = record.id;
        let conflict = || StoreError::Conflict {
            entity: "allocation",
            id: id.into_inner(),
        };

        match &write {
            Write::Insert(_) => {
                if self.allocations.contains_key(&id) {
                    return Err(StoreError::Duplicate(format!("allocation id {id}")));
                }
            }
            Write::Update(record) | Write::Delete(record) => match self.allocations.get(&id) {
                Some(stored) if stored.version == record.version() => {}
                _ => return Err(conflict()),
            },
        }

        if matches!(write, Write::Delete(_)) {
            self.allocations.remove(&id);
            return Ok(());
        }

        if record.spent_amount < Decimal::ZERO || record.spent_amount > record.allocated_amount {
            return Err(StoreError::Backend(format!(
                "allocation {id} violates 0 <= spent_amount <= allocated_amount"
            )));
        }

        let key = record.key;
        if self
            .allocations
            .values()
            .any(|other| other.id != id && other.key == key)
        {
            return Err(StoreError::Duplicate(format!("allocation for {key}")));
        }

        if let Some(committed) = write.into_committed() {
            self.allocations.insert(id, committed);
        }
        Ok(())
    }

    fn apply_expenditure(&mut self, write: Write<Expenditure>) -> Result<(), StoreError> {
        let record = write.record();
        let id = record.id;

        match &write {
            Write::Insert(_) => {
                if self.expenditures.contains_key(&id) {
                    return Err(StoreError::Duplicate(format!("expenditure id {id}")));
                }
            }
            Write::Update(record) | Write::Delete(record) => match self.expenditures.get(&id) {
                Some(stored) if stored.version == record.version() => {}
                _ => {
                    return Err(StoreError::Conflict {
                        entity: "expenditure",
                        id: id.into_inner(),
                    });
                }
            },
        }

        if matches!(write, Write::Delete(_)) {
            self.expenditures.remove(&id);
            return Ok(());
        }

        if record.bill_amount <= Decimal::ZERO {
            return Err(StoreError::Backend(format!(
                "expenditure {id} has a non-positive bill amount"
            )));
        }

        if self.expenditures.values().any(|other| {
            other.id != id
                && other.department_id == record.department_id
                && other.financial_year == record.financial_year
                && other.bill_number == record.bill_number
        }) {
            return Err(StoreError::Duplicate(format!(
                "bill number {} for {}",
                record.bill_number, record.financial_year
            )));
        }

        if let Some(committed) = write.into_committed() {
            self.expenditures.insert(id, committed);
        }
        Ok(())
    }

    /// Fails if an expenditure still points at a deleted allocation's key.
    fn check_deleted_unreferenced(&self, deleted: &[(AllocationId, AllocationKey)]) -> Result<(), StoreError> {
        for (id, key) in deleted {
            if self.expenditures.values().any(|e| e.allocation_key() == *key) {
                return Err(StoreError::Conflict {
                    entity: "allocation",
                    id: id.into_inner(),
                });
            }
        }
        Ok(())
    }
}

/// Store keeping everything in process memory.
///
/// A commit works on a copy of the tables and swaps it in only when every
/// write passed its checks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored allocations.
    pub async fn allocation_count(&self) -> usize {
        self.tables.read().await.allocations.len()
    }

    /// Number of stored expenditures.
    pub async fn expenditure_count(&self) -> usize {
        self.tables.read().await.expenditures.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn allocation(&self, id: AllocationId) -> Result<Option<Allocation>, StoreError> {
        Ok(self.tables.read().await.allocations.get(&id).cloned())
    }

    async fn allocation_by_key(
        &self,
        key: &AllocationKey,
    ) -> Result<Option<Allocation>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .allocations
            .values()
            .find(|a| a.key == *key)
            .cloned())
    }

    async fn expenditure(&self, id: ExpenditureId) -> Result<Option<Expenditure>, StoreError> {
        Ok(self.tables.read().await.expenditures.get(&id).cloned())
    }

    async fn expenditure_by_bill(
        &self,
        department_id: DepartmentId,
        bill_number: &str,
        financial_year: FinancialYear,
    ) -> Result<Option<Expenditure>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .expenditures
            .values()
            .find(|e| {
                e.department_id == department_id
                    && e.financial_year == financial_year
                    && e.bill_number == bill_number
            })
            .cloned())
    }

    async fn count_expenditures_for(&self, key: &AllocationKey) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        let count = tables
            .expenditures
            .values()
            .filter(|e| e.allocation_key() == *key)
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let mut next = tables.clone();

        let deleted: Vec<_> = changes
            .allocations
            .iter()
            .filter_map(|w| match w {
                Write::Delete(a) => Some((a.id, a.key)),
                _ => None,
            })
            .collect();

        for write in changes.allocations {
            next.apply_allocation(write)?;
        }
        for write in changes.expenditures {
            next.apply_expenditure(write)?;
        }
        next.check_deleted_unreferenced(&deleted)?;

        *tables = next;
        Ok(())
    }
}
