//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the stream from the store
//!   ↓
//! 2. Rehydrate the aggregate
//!   ↓
//! 3. Handle the command (pure decision, produces events)
//!   ↓
//! 4. Append at the loaded revision (compare-and-set)
//!   ↓
//! 5. Publish the committed events to the bus
//! ```
//!
//! `dispatch` runs all five steps. `load` + `dispatch_at` split them so a caller can read
//! state, act on it elsewhere (reserve stock, release stock) and then commit its decision
//! only if the stream has not moved in between.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use stockcart_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use stockcart_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The stream moved between load and append.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// The aggregate rejected the command.
    #[error(transparent)]
    Domain(DomainError),

    /// Historical payloads did not deserialize into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// The loaded stream is malformed (wrong stream, gaps).
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::Domain(value)
    }
}

impl DispatchError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

/// Reusable command execution engine.
///
/// Events are appended before they are published; a publish failure is logged and does not
/// undo the append. Consumers of the bus must tolerate redelivery and can always be rebuilt
/// from the store.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate one aggregate. A missing stream yields `make_aggregate(id)` at
    /// version 0.
    pub fn load<A>(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_type, aggregate_id)?;
        validate_loaded_stream(aggregate_type, aggregate_id, 0, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Bring an already rehydrated `aggregate` up to the head of its stream by applying only
    /// the events appended after `aggregate.version()`.
    ///
    /// Returns the number of events applied.
    pub fn catch_up<A>(
        &self,
        aggregate: &mut A,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<usize, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let after = aggregate.version();
        let tail = self.store.load_stream_after(aggregate_type, aggregate_id, after)?;
        validate_loaded_stream(aggregate_type, aggregate_id, after, &tail)?;

        apply_history(aggregate, &tail)?;
        Ok(tail.len())
    }

    /// Load, decide and append in one go.
    pub fn dispatch<A>(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockcart_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate = self.load(aggregate_type, aggregate_id, make_aggregate)?;
        self.dispatch_at(&aggregate, aggregate_type, aggregate_id, command)
    }

    /// Decide against an already loaded `aggregate` and append only if its stream is still
    /// at `aggregate.version()`.
    ///
    /// Fails with `Concurrency` if anything was appended since the aggregate was loaded.
    pub fn dispatch_at<A>(
        &self,
        aggregate: &A,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        command: A::Command,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockcart_events::Event + Serialize,
    {
        let decided = aggregate.handle(&command)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self
            .store
            .append(uncommitted, ExpectedVersion::Exact(aggregate.version()))?;

        for stored in &committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    aggregate_type,
                    aggregate_id = %aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?err,
                    "event committed but not published"
                );
            }
        }

        Ok(committed)
    }
}

/// Advance `aggregate` past events that `dispatch_at` just committed for it.
///
/// The batch must continue exactly where the aggregate's version stands.
pub fn apply_committed<A>(aggregate: &mut A, committed: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let Some(first) = committed.first() else {
        return Ok(());
    };
    validate_loaded_stream(
        &first.aggregate_type,
        first.aggregate_id,
        aggregate.version(),
        committed,
    )?;
    apply_history(aggregate, committed)
}

fn validate_loaded_stream(
    aggregate_type: &str,
    aggregate_id: AggregateId,
    after: u64,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id || e.aggregate_type != aggregate_type {
            return Err(DispatchError::CorruptStream(format!(
                "loaded stream contains a foreign event at index {idx}"
            )));
        }
        let expected = after + idx as u64 + 1;
        if e.sequence_number != expected {
            return Err(DispatchError::CorruptStream(format!(
                "sequence gap (expected {expected}, found {})",
                e.sequence_number
            )));
        }
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}
