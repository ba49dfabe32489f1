//! Value objects: compared by value, never by identity.
//!
//! Stock level snapshots and order-summary lines are value objects: two snapshots with the
//! same counters are interchangeable.

/// Marker trait for immutable values compared by their attributes.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
