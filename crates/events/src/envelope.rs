use serde::{Deserialize, Serialize};

use stockcart_core::AggregateId;

/// A committed event as it travels over the bus: the payload plus where it sits in its
/// stream.
///
/// Positions are 1-based and gapless per `(aggregate_type, aggregate_id)`, so consumers drop
/// redeliveries by remembering the last position they applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    aggregate_type: String,
    aggregate_id: AggregateId,
    sequence_number: u64,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: AggregateId, sequence_number: u64, payload: E) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            sequence_number,
            payload,
        }
    }

    /// True if this envelope comes from a stream of `aggregate_type`.
    pub fn belongs_to(&self, aggregate_type: &str) -> bool {
        self.aggregate_type == aggregate_type
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}
