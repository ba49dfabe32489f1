//! Read side of the catalog, as consumed by the cart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use stockcart_core::{Aggregate, AggregateRoot};
use stockcart_events::EventEnvelope;

use crate::product::{Product, ProductEvent, ProductId, VariantId, AGGREGATE_TYPE};

/// What the cart needs to know about a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductView {
    pub product_id: ProductId,
    pub name: String,
    pub has_variants: bool,
    pub price: u64,
    pub is_active: bool,
}

/// What the cart needs to know about a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantView {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub label: String,
    pub price: u64,
    /// False when either the variant is retired or its product is not active.
    pub is_active: bool,
}

/// Read-only catalog lookups.
pub trait ProductCatalog: Send + Sync {
    fn get_product(&self, product_id: ProductId) -> Option<ProductView>;

    fn get_variant(&self, variant_id: VariantId) -> Option<VariantView>;
}

impl<C> ProductCatalog for Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    fn get_product(&self, product_id: ProductId) -> Option<ProductView> {
        (**self).get_product(product_id)
    }

    fn get_variant(&self, variant_id: VariantId) -> Option<VariantView> {
        (**self).get_variant(variant_id)
    }
}

#[derive(Debug, Error)]
pub enum CatalogProjectionError {
    #[error("failed to deserialize product event: {0}")]
    Deserialize(String),

    #[error("event product_id does not match envelope aggregate_id")]
    StreamMismatch,

    #[error("sequence gap for product {product_id} (have {have}, got {got})")]
    SequenceGap { product_id: ProductId, have: u64, got: u64 },
}

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, Product>,
    variant_index: HashMap<VariantId, ProductId>,
}

/// In-memory catalog projection.
///
/// Keeps one rehydrated `Product` per stream; the aggregate version doubles as the
/// projection cursor, so redelivered envelopes are ignored.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a published envelope (JSON payload).
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), CatalogProjectionError> {
        if !envelope.belongs_to(AGGREGATE_TYPE) {
            return Ok(());
        }

        let event: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CatalogProjectionError::Deserialize(e.to_string()))?;

        if event.product_id().0 != envelope.aggregate_id() {
            return Err(CatalogProjectionError::StreamMismatch);
        }

        self.apply_at(envelope.sequence_number(), &event)
    }

    /// Apply a typed event known to sit at `sequence_number` in its stream.
    pub fn apply_at(&self, sequence_number: u64, event: &ProductEvent) -> Result<(), CatalogProjectionError> {
        let product_id = event.product_id();
        let Ok(mut state) = self.state.write() else {
            return Ok(());
        };

        let product = state
            .products
            .entry(product_id)
            .or_insert_with(|| Product::empty(product_id));
        let have = product.version();

        if sequence_number <= have {
            debug!(%product_id, sequence_number, "duplicate product event ignored");
            return Ok(());
        }
        if sequence_number != have + 1 {
            return Err(CatalogProjectionError::SequenceGap {
                product_id,
                have,
                got: sequence_number,
            });
        }

        product.apply(event);

        if let ProductEvent::VariantAdded(e) = event {
            state.variant_index.insert(e.variant_id, product_id);
        }

        Ok(())
    }

    /// Rebuild from a full replay of product events.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), CatalogProjectionError> {
        if let Ok(mut state) = self.state.write() {
            *state = CatalogState::default();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn get_product(&self, product_id: ProductId) -> Option<ProductView> {
        let state = self.state.read().ok()?;
        let product = state.products.get(&product_id).filter(|p| p.is_created())?;

        Some(ProductView {
            product_id,
            name: product.name().to_string(),
            has_variants: product.has_variants(),
            price: product.price(),
            is_active: product.can_be_sold(),
        })
    }

    fn get_variant(&self, variant_id: VariantId) -> Option<VariantView> {
        let state = self.state.read().ok()?;
        let product_id = state.variant_index.get(&variant_id)?;
        let product = state.products.get(product_id)?;
        let variant = product.variant(variant_id)?;

        Some(VariantView {
            variant_id,
            product_id: *product_id,
            label: variant.label.clone(),
            price: product.variant_price(variant),
            is_active: product.can_be_sold() && !variant.retired,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use stockcart_core::AggregateId;

    use super::*;
    use crate::product::{ProductActivated, ProductCreated, VariantAdded, VariantRetired};

    fn envelope(seq: u64, event: &ProductEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            AGGREGATE_TYPE,
            event.product_id().0,
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn tee_events(product_id: ProductId, variant_id: VariantId) -> Vec<ProductEvent> {
        let now = Utc::now();
        vec![
            ProductEvent::ProductCreated(ProductCreated {
                product_id,
                sku: "TEE".to_string(),
                name: "Tee".to_string(),
                price: 2000,
                occurred_at: now,
            }),
            ProductEvent::VariantAdded(VariantAdded {
                product_id,
                variant_id,
                label: "M".to_string(),
                price_override: None,
                occurred_at: now,
            }),
            ProductEvent::ProductActivated(ProductActivated {
                product_id,
                occurred_at: now,
            }),
        ]
    }

    #[test]
    fn variant_lookup_reports_product_and_price() {
        let catalog = InMemoryCatalog::new();
        let product_id = ProductId::new(AggregateId::new());
        let variant_id = VariantId::new(AggregateId::new());

        for (i, e) in tee_events(product_id, variant_id).iter().enumerate() {
            catalog.apply_envelope(&envelope(i as u64 + 1, e)).unwrap();
        }

        let product = catalog.get_product(product_id).unwrap();
        assert!(product.has_variants);
        assert!(product.is_active);

        let variant = catalog.get_variant(variant_id).unwrap();
        assert_eq!(variant.product_id, product_id);
        assert_eq!(variant.price, 2000);
        assert!(variant.is_active);
    }

    #[test]
    fn retired_variant_is_inactive() {
        let catalog = InMemoryCatalog::new();
        let product_id = ProductId::new(AggregateId::new());
        let variant_id = VariantId::new(AggregateId::new());

        let mut events = tee_events(product_id, variant_id);
        events.push(ProductEvent::VariantRetired(VariantRetired {
            product_id,
            variant_id,
            occurred_at: Utc::now(),
        }));
        for (i, e) in events.iter().enumerate() {
            catalog.apply_at(i as u64 + 1, e).unwrap();
        }

        assert!(!catalog.get_variant(variant_id).unwrap().is_active);
        assert!(catalog.get_product(product_id).unwrap().is_active);
    }

    #[test]
    fn redelivered_events_are_ignored_and_gaps_rejected() {
        let catalog = InMemoryCatalog::new();
        let product_id = ProductId::new(AggregateId::new());
        let variant_id = VariantId::new(AggregateId::new());
        let events = tee_events(product_id, variant_id);

        catalog.apply_at(1, &events[0]).unwrap();
        catalog.apply_at(1, &events[0]).unwrap();
        let err = catalog.apply_at(3, &events[2]).unwrap_err();

        assert!(matches!(err, CatalogProjectionError::SequenceGap { have: 1, got: 3, .. }));
        assert!(!catalog.get_product(product_id).unwrap().is_active);
    }

    #[test]
    fn unknown_ids_are_none() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.get_product(ProductId::new(AggregateId::new())).is_none());
        assert!(catalog.get_variant(VariantId::new(AggregateId::new())).is_none());
    }
}
