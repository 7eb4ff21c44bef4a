//! Application-wide error types.

use thiserror::Error;

/// Result type alias using `AppError`.
pub type AppResult<T> = Result<T, AppError>;

/// Message shown instead of internal details in production.
const GENERIC_INTERNAL_MESSAGE: &str = "An unexpected error occurred";

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Access denied.
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Business rule violation (e.g. budget exceeded).
    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    /// Conflict (e.g., duplicate entry or invalid state transition).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Concurrent modification detected; the caller may retry.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Resource is locked by another actor; the caller may retry.
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::BusinessRule(_) => 422,
            Self::Conflict(_) | Self::ConcurrentModification(_) => 409,
            Self::ResourceBusy(_) => 423,
            Self::Database(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::BusinessRule(_) => "BUSINESS_RULE_VIOLATION",
            Self::Conflict(_) => "CONFLICT",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::ResourceBusy(_) => "LOCKED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the caller should retry the request after a short delay.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceBusy(_) | Self::ConcurrentModification(_))
    }

    /// Returns the message safe to show to a caller.
    ///
    /// Server-side failures keep their details out of production responses;
    /// those details belong in the logs.
    #[must_use]
    pub fn public_message(&self, production: bool) -> String {
        if production && self.status_code() >= 500 {
            GENERIC_INTERNAL_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}
