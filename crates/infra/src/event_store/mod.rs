//! Append-only event store boundary.
//!
//! Storage-agnostic: the in-memory store backs tests and single-process runs, the Postgres
//! store backs persistent deployments. Both give the same per-stream compare-and-set.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
