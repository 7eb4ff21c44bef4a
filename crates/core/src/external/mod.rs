//! Collaborators outside the consistency core.
//!
//! The core consumes these through traits. The adapters here keep data in
//! memory or write to the tracing log and are enough for tests and for the
//! seeder binary.

pub mod audit;
pub mod directory;
pub mod notification;

pub use audit::{AuditError, AuditEvent, AuditEventKind, AuditSink, AuditTarget, LogAuditSink};
pub use directory::{BudgetHeadInfo, DepartmentInfo, Directory, DirectoryError, StaticDirectory};
pub use notification::{LogNotifier, Notification, NotificationKind, Notifier, NotifyError, Recipient};
