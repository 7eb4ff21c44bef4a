//! Test fixtures and recording collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bursar_shared::types::{
    AllocationId, BudgetHeadId, DepartmentId, ExpenditureId, FinancialYear, UserId,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::actor::{Actor, Role};
use crate::allocation::{Allocation, AllocationKey, AllocationLedger, CreateAllocationInput};
use crate::expenditure::{Expenditure, ExpenditureService, SubmitExpenditureInput};
use crate::external::{
    AuditError, AuditEvent, AuditSink, BudgetHeadInfo, DepartmentInfo, Notification, Notifier,
    NotifyError, StaticDirectory,
};
use crate::lock::{LockManager, ManualClock};
use crate::store::{ChangeSet, LedgerStore, MemoryStore, StoreError};
use crate::transaction::TransactionCoordinator;

pub const LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// A date inside financial year 2024-2025.
pub fn bill_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 15).unwrap()
}

/// A fresh allocation for FY 2024-2025 with nothing spent.
pub fn allocation(allocated: Decimal) -> Allocation {
    let key = AllocationKey {
        department_id: DepartmentId::new(),
        budget_head_id: BudgetHeadId::new(),
        financial_year: FinancialYear::starting(2024),
    };
    Allocation::new(key, allocated, None, UserId::new())
}

/// A pending expenditure drawing on `allocation`.
pub fn expenditure_for(allocation: &Allocation, amount: Decimal, has_head: bool) -> Expenditure {
    let department = DepartmentInfo {
        id: allocation.key.department_id,
        name: "Test department".into(),
        head_id: has_head.then(UserId::new),
    };
    let submitter = Actor::new(UserId::new(), Role::Department).in_department(department.id);
    let input = SubmitExpenditureInput {
        budget_head_id: allocation.key.budget_head_id,
        bill_number: format!("BILL-{}", uuid::Uuid::now_v7().simple()),
        bill_date: bill_date(),
        bill_amount: amount,
        party_name: "Supplier".into(),
        expense_details: "Supplies".into(),
        reference_budget_register_no: None,
        attachments: vec![],
    };
    Expenditure::submit(&submitter, input, &department).unwrap()
}

/// Notifier that keeps what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose deliveries always fail.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError("mail server down".into()));
        }
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Audit sink that keeps recorded events.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    fail: bool,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writes always fail.
    pub fn failing() -> Self {
        Self {
            events: Mutex::default(),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.fail {
            return Err(AuditError("audit table unavailable".into()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Store that can be switched into failing like an unreachable database.
#[derive(Debug)]
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    fail_reads: AtomicBool,
    fail_commits: AtomicBool,
}

impl FaultyStore {
    /// Wraps `inner`; nothing fails until switched on.
    pub fn over(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Makes every read fail, or stop failing.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every commit fail, or stop failing.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn read_guard(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset by peer".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FaultyStore {
    async fn allocation(&self, id: AllocationId) -> Result<Option<Allocation>, StoreError> {
        self.read_guard()?;
        self.inner.allocation(id).await
    }

    async fn allocation_by_key(
        &self,
        key: &AllocationKey,
    ) -> Result<Option<Allocation>, StoreError> {
        self.read_guard()?;
        self.inner.allocation_by_key(key).await
    }

    async fn expenditure(&self, id: ExpenditureId) -> Result<Option<Expenditure>, StoreError> {
        self.read_guard()?;
        self.inner.expenditure(id).await
    }

    async fn expenditure_by_bill(
        &self,
        department_id: DepartmentId,
        bill_number: &str,
        financial_year: FinancialYear,
    ) -> Result<Option<Expenditure>, StoreError> {
        self.read_guard()?;
        self.inner
            .expenditure_by_bill(department_id, bill_number, financial_year)
            .await
    }

    async fn count_expenditures_for(&self, key: &AllocationKey) -> Result<u64, StoreError> {
        self.read_guard()?;
        self.inner.count_expenditures_for(key).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("could not serialize access".into()));
        }
        self.inner.commit(changes).await
    }
}

/// A department with one allocation of 1000 for FY 2024-2025, wired to an
/// in-memory store, a manual clock and recording collaborators.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub faults: Arc<FaultyStore>,
    pub clock: Arc<ManualClock>,
    pub coordinator: TransactionCoordinator,
    pub directory: Arc<StaticDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<RecordingAuditSink>,
    pub ledger: AllocationLedger,
    pub service: ExpenditureService,
    pub department_id: DepartmentId,
    pub budget_head_id: BudgetHeadId,
    pub financial_year: FinancialYear,
    pub allocation_id: AllocationId,
    pub submitter: Actor,
    pub hod: Actor,
    pub office: Actor,
    pub principal: Actor,
}

impl Fixture {
    pub async fn new(has_head: bool) -> Self {
        Self::build(
            has_head,
            dec!(1000),
            Arc::new(RecordingNotifier::new()),
            Arc::new(RecordingAuditSink::new()),
        )
        .await
    }

    pub async fn with_allocation(has_head: bool, allocated: Decimal) -> Self {
        Self::build(
            has_head,
            allocated,
            Arc::new(RecordingNotifier::new()),
            Arc::new(RecordingAuditSink::new()),
        )
        .await
    }

    pub async fn with_audit(has_head: bool, audit: Arc<RecordingAuditSink>) -> Self {
        Self::build(has_head, dec!(1000), Arc::new(RecordingNotifier::new()), audit).await
    }

    pub async fn with_notifier(has_head: bool, notifier: Arc<RecordingNotifier>) -> Self {
        Self::build(has_head, dec!(1000), notifier, Arc::new(RecordingAuditSink::new())).await
    }

    async fn build(
        has_head: bool,
        allocated: Decimal,
        notifier: Arc<RecordingNotifier>,
        audit: Arc<RecordingAuditSink>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(FaultyStore::over(store.clone()));
        let clock = Arc::new(ManualClock::default());
        let locks = Arc::new(LockManager::with_clock(LOCK_TIMEOUT, clock.clone()));
        let coordinator = TransactionCoordinator::new(faults.clone(), locks);

        let department_id = DepartmentId::new();
        let budget_head_id = BudgetHeadId::new();
        let hod = Actor::new(UserId::new(), Role::Hod).in_department(department_id);

        let directory = Arc::new(StaticDirectory::new());
        directory.add_department(DepartmentInfo {
            id: department_id,
            name: "Physics".into(),
            head_id: has_head.then_some(hod.user_id),
        });
        directory.add_budget_head(BudgetHeadInfo {
            id: budget_head_id,
            name: "Equipment".into(),
        });

        let ledger = AllocationLedger::new(coordinator.clone(), directory.clone(), audit.clone());
        let service = ExpenditureService::new(
            coordinator.clone(),
            directory.clone(),
            notifier.clone(),
            audit.clone(),
        );

        let office = Actor::new(UserId::new(), Role::Office);
        let financial_year = FinancialYear::starting(2024);
        let allocation = ledger
            .create_allocation(
                &office,
                CreateAllocationInput {
                    department_id,
                    budget_head_id,
                    financial_year,
                    allocated_amount: allocated,
                    remarks: None,
                },
            )
            .await
            .unwrap();

        Self {
            store,
            faults,
            clock,
            coordinator,
            directory,
            notifier,
            audit,
            ledger,
            service,
            department_id,
            budget_head_id,
            financial_year,
            allocation_id: allocation.id,
            submitter: Actor::new(UserId::new(), Role::Department).in_department(department_id),
            hod,
            office,
            principal: Actor::new(UserId::new(), Role::Principal),
        }
    }

    /// Submission input for a bill in FY 2024-2025.
    pub fn bill(&self, number: &str, amount: Decimal) -> SubmitExpenditureInput {
        SubmitExpenditureInput {
            budget_head_id: self.budget_head_id,
            bill_number: number.into(),
            bill_date: bill_date(),
            bill_amount: amount,
            party_name: "Lab Supplies Ltd".into(),
            expense_details: "Oscilloscope leads".into(),
            reference_budget_register_no: Some("BR-17".into()),
            attachments: vec![],
        }
    }

    /// Submits a bill as the fixture's department user.
    pub async fn submit(&self, number: &str, amount: Decimal) -> Expenditure {
        self.service
            .submit_expenditure(&self.submitter, self.bill(number, amount))
            .await
            .unwrap()
    }

    pub async fn allocation(&self) -> Allocation {
        self.ledger.allocation(self.allocation_id).await.unwrap()
    }

    /// Another office user, holding locks under a different identity.
    pub fn second_office(&self) -> Actor {
        Actor::new(UserId::new(), Role::Office)
    }
}
