//! Domain error model.

use thiserror::Error;
use uuid::Uuid;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
///
/// The two payload-carrying variants exist so callers can report *why* a
/// reservation or consumption was refused without re-reading state:
/// `SlotTaken` names the blocking booking, `InsufficientStock` the quantity
/// that was actually on hand at decision time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, end before start).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated (e.g. stock would go negative).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested time slot overlaps an existing active booking.
    #[error("slot taken: conflicts with booking {conflicting_booking}")]
    SlotTaken { conflicting_booking: Uuid },

    /// Consumption requested more stock than is on hand.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// Authorization failure at the domain boundary (e.g. not the owner).
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn slot_taken(conflicting_booking: Uuid) -> Self {
        Self::SlotTaken {
            conflicting_booking,
        }
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }
}
