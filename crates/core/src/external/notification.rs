//! Notification delivery.

use std::fmt;

use async_trait::async_trait;
use bursar_shared::types::{ExpenditureId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::actor::Role;

/// Who receives a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Recipient {
    /// Everyone holding a role.
    Role(Role),
    /// A specific user.
    User(UserId),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role(role) => write!(f, "role:{role}"),
            Self::User(user) => write!(f, "user:{user}"),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// An expenditure is waiting for the recipient's decision.
    ApprovalRequired,
    /// The recipient's expenditure was finally approved.
    Approved,
    /// The recipient's expenditure was rejected.
    Rejected,
}

/// A message to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Who receives it.
    pub recipient: Recipient,
    /// What happened.
    pub kind: NotificationKind,
    /// The expenditure concerned.
    pub expenditure_id: ExpenditureId,
    /// Human-readable text.
    pub message: String,
}

/// Delivery failure.
#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Fire-and-forget notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers a notification.
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Notifier that writes to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            recipient = %notification.recipient,
            kind = ?notification.kind,
            expenditure_id = %notification.expenditure_id,
            message = %notification.message,
            "Notification"
        );
        Ok(())
    }
}
