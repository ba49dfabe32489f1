//! Infrastructure layer: event storage, command dispatch, retries, read models and
//! background workers.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod retry;
pub mod snapshot;
pub mod workers;

pub use command_dispatcher::{apply_committed, CommandDispatcher, DispatchError};
pub use retry::{Attempt, RetryError, RetryPolicy};
pub use snapshot::SnapshotCache;
