//! Application error model.

use labtrack_infra::command_dispatcher::DispatchError;
use thiserror::Error;
use uuid::Uuid;

/// Error surfaced by the application services.
///
/// Mirrors the domain taxonomy so callers can react per case (`SlotTaken` and
/// `InsufficientStock` keep their payloads); infrastructure failures collapse
/// into `Internal`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("slot taken: conflicts with booking {conflicting_booking}")]
    SlotTaken { conflicting_booking: Uuid },

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic-concurrency conflict that survived the bounded retries.
    #[error("concurrent update lost: {0}")]
    Concurrency(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the whole operation can be safely re-submitted as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Concurrency(_))
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation(msg) => AppError::Validation(msg),
            DispatchError::InvariantViolation(msg) => AppError::InvariantViolation(msg),
            DispatchError::SlotTaken {
                conflicting_booking,
            } => AppError::SlotTaken {
                conflicting_booking,
            },
            DispatchError::InsufficientStock {
                requested,
                available,
            } => AppError::InsufficientStock {
                requested,
                available,
            },
            DispatchError::NotFound => AppError::NotFound,
            DispatchError::Conflict(msg) => AppError::Conflict(msg),
            DispatchError::Concurrency(msg) => AppError::Concurrency(msg),
            DispatchError::Unauthorized => AppError::Unauthorized,
            // Cross-lab access is reported like any other authorization failure.
            DispatchError::LabIsolation(_) => AppError::Unauthorized,
            DispatchError::Deserialize(msg) => AppError::Internal(msg),
            DispatchError::Store(e) => AppError::Internal(format!("{e:?}")),
            DispatchError::Publish(msg) => AppError::Internal(msg),
        }
    }
}
