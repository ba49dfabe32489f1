use std::collections::HashMap;
use std::sync::RwLock;

use stockcart_core::{AggregateId, ExpectedVersion};

use super::r#trait::{single_stream, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

type StreamKey = (String, AggregateId);

/// In-memory append-only event store.
///
/// One write lock covers the version check and the push, which is what makes `append` a
/// compare-and-set.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::Backend("lock poisoned".to_string())
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let key = single_stream(&events)?;

        let mut streams = self.streams.write().map_err(|_| Self::poisoned())?;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;

        Ok(streams
            .get(&(aggregate_type.to_string(), aggregate_id))
            .cloned()
            .unwrap_or_default())
    }

    fn load_stream_after(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        after: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;

        // Sequence numbers are 1-based and gapless, so the tail starts at index `after`.
        let tail = streams
            .get(&(aggregate_type.to_string(), aggregate_id))
            .and_then(|s| s.get(after as usize..))
            .map(<[StoredEvent]>::to_vec)
            .unwrap_or_default();
        Ok(tail)
    }

    fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;

        let mut keys: Vec<&StreamKey> = streams.keys().filter(|(t, _)| t == aggregate_type).collect();
        keys.sort_by_key(|(_, id)| *id);

        Ok(keys
            .into_iter()
            .filter_map(|k| streams.get(k))
            .flat_map(|s| s.iter().cloned())
            .collect())
    }
}
