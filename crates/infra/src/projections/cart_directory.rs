use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use stockcart_cart::{CartEvent, CartId, CartStatus, AGGREGATE_TYPE};
use stockcart_core::{AggregateId, OwnerId};
use stockcart_events::EventEnvelope;

use crate::read_model::ReadModelStore;

/// One row per cart: enough to find idle carts without loading every stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSummary {
    pub cart_id: CartId,
    pub owner_id: OwnerId,
    pub status: CartStatus,
    pub line_count: usize,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CartDirectoryError {
    #[error("failed to deserialize cart event: {0}")]
    Deserialize(String),

    #[error("event cart_id does not match envelope aggregate_id")]
    StreamMismatch,

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Cart directory projection.
///
/// Eventually consistent. The reclaimer uses it only to pick candidates and always
/// re-checks the cart stream before acting.
#[derive(Debug)]
pub struct CartDirectory<S>
where
    S: ReadModelStore<CartId, CartSummary>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> CartDirectory<S>
where
    S: ReadModelStore<CartId, CartSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, cart_id: &CartId) -> Option<CartSummary> {
        self.store.get(cart_id)
    }

    pub fn list(&self) -> Vec<CartSummary> {
        self.store.list()
    }

    /// ACTIVE carts whose last activity is strictly before `cutoff`, oldest first.
    pub fn idle_before(&self, cutoff: DateTime<Utc>) -> Vec<CartSummary> {
        let mut idle: Vec<CartSummary> = self
            .store
            .list()
            .into_iter()
            .filter(|c| c.status == CartStatus::Active && c.last_activity_at < cutoff)
            .collect();
        idle.sort_by_key(|c| (c.last_activity_at, c.cart_id));
        idle
    }

    /// Apply a published envelope. Envelopes of other aggregate types are ignored, as are
    /// redeliveries at or below the stream cursor.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), CartDirectoryError> {
        if !envelope.belongs_to(AGGREGATE_TYPE) {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let Ok(mut cursors) = self.cursors.write() else {
            return Ok(());
        };
        let last = cursors.get(&aggregate_id).copied().unwrap_or(0);

        if seq <= last {
            debug!(%aggregate_id, seq, last, "duplicate cart event ignored");
            return Ok(());
        }
        if seq != last + 1 {
            return Err(CartDirectoryError::NonMonotonicSequence { last, found: seq });
        }

        let event: CartEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CartDirectoryError::Deserialize(e.to_string()))?;
        let cart_id = event.cart_id();
        if cart_id.0 != aggregate_id {
            return Err(CartDirectoryError::StreamMismatch);
        }

        self.apply_event(cart_id, &event);
        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    fn apply_event(&self, cart_id: CartId, event: &CartEvent) {
        if let CartEvent::CartOpened(e) = event {
            self.store.upsert(
                cart_id,
                CartSummary {
                    cart_id,
                    owner_id: e.owner_id,
                    status: CartStatus::Active,
                    line_count: 0,
                    last_activity_at: e.occurred_at,
                },
            );
            return;
        }

        let Some(mut row) = self.store.get(&cart_id) else {
            return;
        };

        match event {
            CartEvent::ItemAdded(_) => row.line_count += 1,
            CartEvent::ItemRemoved(_) => row.line_count = row.line_count.saturating_sub(1),
            _ => {}
        }
        row.status = event.resulting_status();
        row.last_activity_at = stockcart_events::Event::occurred_at(event);
        self.store.upsert(cart_id, row);
    }

    /// Rebuild from a full replay of cart events.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), CartDirectoryError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
