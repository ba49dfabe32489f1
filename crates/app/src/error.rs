//! Errors surfaced by the cart and stock operations.

use thiserror::Error;
use tracing::error;

use stockcart_core::DomainError;
use stockcart_infra::DispatchError;
use stockcart_infra::event_store::EventStoreError;

/// Error returned by every application-level operation.
///
/// Every variant except `ReservationUnderflow` and `Store` leaves both the ledger and the
/// cart exactly as they were before the call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CartError {
    #[error("insufficient stock (requested: {requested}, available: {available})")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("cart is closed ({0})")]
    CartClosed(String),

    #[error("cart not found")]
    CartNotFound,

    #[error("cart item not found")]
    ItemNotFound,

    #[error("product requires a variant")]
    VariantRequired,

    #[error("product does not have variants")]
    VariantNotAllowed,

    #[error("product or variant not found")]
    ProductNotFound,

    #[error("product or variant is not available for sale")]
    ProductUnavailable,

    #[error("no stock registered for this key")]
    StockNotFound,

    #[error("cannot check out an empty cart")]
    EmptyCart,

    /// Retry budget exhausted under contention. Safe to retry from the top.
    #[error("concurrent modification, retry budget exhausted")]
    ConcurrentModification,

    /// A release or commit exceeded the outstanding reservation. Always a defect.
    #[error("reservation underflow (requested: {requested}, reserved: {reserved})")]
    ReservationUnderflow { requested: i64, reserved: i64 },

    /// Any other rule rejection (duplicate registration, invalid catalog data, ...).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("storage failure: {0}")]
    Store(String),
}

impl CartError {
    /// True for conditions that indicate a bug rather than a caller mistake.
    pub fn is_defect(&self) -> bool {
        matches!(self, CartError::ReservationUnderflow { .. })
    }
}

impl From<DomainError> for CartError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InsufficientStock { requested, available } => {
                CartError::InsufficientStock { requested, available }
            }
            DomainError::InvalidQuantity(q) => CartError::InvalidQuantity(q),
            DomainError::ReservationUnderflow { requested, reserved } => {
                error!(requested, reserved, "reservation underflow");
                CartError::ReservationUnderflow { requested, reserved }
            }
            DomainError::CartClosed(status) => CartError::CartClosed(status),
            DomainError::ItemNotFound => CartError::ItemNotFound,
            DomainError::VariantRequired => CartError::VariantRequired,
            DomainError::VariantNotAllowed => CartError::VariantNotAllowed,
            DomainError::NotFound => CartError::Rejected("not found".to_string()),
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg)
            | DomainError::Conflict(msg) => CartError::Rejected(msg),
        }
    }
}

impl From<EventStoreError> for CartError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(_) => CartError::ConcurrentModification,
            other => CartError::Store(other.to_string()),
        }
    }
}

impl From<DispatchError> for CartError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(_) => CartError::ConcurrentModification,
            DispatchError::Domain(e) => e.into(),
            DispatchError::Store(e) => e.into(),
            other => CartError::Store(other.to_string()),
        }
    }
}

/// Map a dispatch error where "not found" means the given missing thing.
pub(crate) fn with_not_found(err: DispatchError, not_found: CartError) -> CartError {
    match err {
        DispatchError::Domain(DomainError::NotFound) => not_found,
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_concurrency_is_concurrent_modification() {
        let err: CartError = DispatchError::Concurrency("stale".to_string()).into();
        assert_eq!(err, CartError::ConcurrentModification);
    }

    #[test]
    fn not_found_is_contextual() {
        let err = with_not_found(DispatchError::Domain(DomainError::NotFound), CartError::StockNotFound);
        assert_eq!(err, CartError::StockNotFound);

        let err = with_not_found(DispatchError::Domain(DomainError::ItemNotFound), CartError::CartNotFound);
        assert_eq!(err, CartError::ItemNotFound);
    }

    #[test]
    fn underflow_is_a_defect() {
        let err: CartError = DomainError::ReservationUnderflow {
            requested: 3,
            reserved: 1,
        }
        .into();
        assert!(err.is_defect());
        assert!(!CartError::InsufficientStock {
            requested: 1,
            available: 0
        }
        .is_defect());
    }
}
