//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, invariants, conflicts). Storage and
/// transport failures are modelled by the infrastructure crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. an empty name).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A quantity was zero or negative.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// Not enough unreserved stock to satisfy a reservation.
    #[error("insufficient stock (requested: {requested}, available: {available})")]
    InsufficientStock { requested: i64, available: i64 },

    /// A release or commit asked for more than is currently reserved.
    ///
    /// This is a programming error in the caller, never a normal outcome.
    #[error("reservation underflow (requested: {requested}, reserved: {reserved})")]
    ReservationUnderflow { requested: i64, reserved: i64 },

    /// A mutation was attempted on a cart that already left ACTIVE.
    #[error("cart is closed ({0})")]
    CartClosed(String),

    /// The referenced cart line does not exist.
    #[error("cart item not found")]
    ItemNotFound,

    /// The product has variants, so a variant must be given.
    #[error("product requires a variant")]
    VariantRequired,

    /// The product has no variants, so none may be given.
    #[error("product does not have variants")]
    VariantNotAllowed,

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (stale revision, duplicate creation).
    #[error("conflict: {0}")]
    Conflict(String),
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

    pub fn cart_closed(status: impl core::fmt::Display) -> Self {
        Self::CartClosed(status.to_string())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
