//! Audit trail.

use async_trait::async_trait;
use bursar_shared::types::{AllocationId, ExpenditureId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::actor::{Actor, Role};

/// Kind of audited change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Allocation created.
    AllocationCreated,
    /// Allocated amount revised.
    AllocationRevised,
    /// Allocation debited directly through the ledger.
    AllocationDebited,
    /// Allocation deleted.
    AllocationDeleted,
    /// Expenditure submitted.
    ExpenditureSubmitted,
    /// Expenditure verified by the department head.
    ExpenditureVerified,
    /// Expenditure approved at a step (forwarded or final).
    ExpenditureApproved,
    /// Expenditure rejected.
    ExpenditureRejected,
    /// Expenditure resubmitted.
    ExpenditureResubmitted,
}

impl AuditEventKind {
    /// Returns the string representation of the event kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllocationCreated => "allocation_created",
            Self::AllocationRevised => "allocation_revised",
            Self::AllocationDebited => "allocation_debited",
            Self::AllocationDeleted => "allocation_deleted",
            Self::ExpenditureSubmitted => "expenditure_submitted",
            Self::ExpenditureVerified => "expenditure_verified",
            Self::ExpenditureApproved => "expenditure_approved",
            Self::ExpenditureRejected => "expenditure_rejected",
            Self::ExpenditureResubmitted => "expenditure_resubmitted",
        }
    }
}

/// Record an audit event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AuditTarget {
    /// An allocation.
    Allocation(AllocationId),
    /// An expenditure.
    Expenditure(ExpenditureId),
}

/// One audited change with before and after snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened.
    pub kind: AuditEventKind,
    /// Who did it.
    pub actor: UserId,
    /// The actor's role at the time.
    pub actor_role: Role,
    /// What it happened to.
    pub target: AuditTarget,
    /// Snapshot before the change, if the record existed.
    pub before: Option<Value>,
    /// Snapshot after the change.
    pub after: Option<Value>,
    /// When.
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    /// Creates an event for `actor`, snapshotting `before` and `after`.
    pub fn new<B: Serialize, A: Serialize>(
        kind: AuditEventKind,
        actor: &Actor,
        target: AuditTarget,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Self {
        Self {
            kind,
            actor: actor.user_id,
            actor_role: actor.role,
            target,
            before: before.and_then(|b| serde_json::to_value(b).ok()),
            after: after.and_then(|a| serde_json::to_value(a).ok()),
            at: Utc::now(),
        }
    }
}

/// Audit sink failure.
#[derive(Debug, Error)]
#[error("Audit sink failed: {0}")]
pub struct AuditError(pub String);

/// Fire-and-forget audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records an event.
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Audit sink that writes to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let target = serde_json::to_string(&event.target).map_err(|e| AuditError(e.to_string()))?;
        info!(
            kind = event.kind.as_str(),
            actor = %event.actor,
            actor_role = %event.actor_role,
            target = %target,
            "Audit event"
        );
        Ok(())
    }
}
