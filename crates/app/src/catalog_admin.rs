//! Catalog maintenance: the write side behind the read-only `ProductCatalog`.
//!
//! Committed product events are applied to the in-process catalog before returning, so a
//! product is purchasable as soon as `activate` succeeds. The projection worker sees the same
//! envelopes later and ignores them as duplicates.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use stockcart_catalog::{
    ActivateProduct, AddVariant, ArchiveProduct, ChangePrice, CreateProduct, InMemoryCatalog, Product,
    ProductCommand, ProductId, RetireVariant, VariantId, AGGREGATE_TYPE,
};
use stockcart_core::AggregateId;
use stockcart_infra::event_store::StoredEvent;

use crate::error::{with_not_found, CartError};
use crate::services::Dispatcher;

fn make_product(id: AggregateId) -> Product {
    Product::empty(ProductId::new(id))
}

pub struct CatalogAdmin {
    dispatcher: Arc<Dispatcher>,
    catalog: Arc<InMemoryCatalog>,
}

impl CatalogAdmin {
    pub fn new(dispatcher: Arc<Dispatcher>, catalog: Arc<InMemoryCatalog>) -> Self {
        Self { dispatcher, catalog }
    }

    /// Create a draft product. It cannot be sold until `activate`.
    pub fn create_product(&self, sku: &str, name: &str, price: u64) -> Result<ProductId, CartError> {
        let product_id = ProductId::new(AggregateId::new());
        self.execute(
            product_id,
            ProductCommand::CreateProduct(CreateProduct {
                product_id,
                sku: sku.to_string(),
                name: name.to_string(),
                price,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(%product_id, sku, "product created");
        Ok(product_id)
    }

    pub fn add_variant(
        &self,
        product_id: ProductId,
        label: &str,
        price_override: Option<u64>,
    ) -> Result<VariantId, CartError> {
        let variant_id = VariantId::new(AggregateId::new());
        self.execute(
            product_id,
            ProductCommand::AddVariant(AddVariant {
                product_id,
                variant_id,
                label: label.to_string(),
                price_override,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(variant_id)
    }

    pub fn retire_variant(&self, product_id: ProductId, variant_id: VariantId) -> Result<(), CartError> {
        self.execute(
            product_id,
            ProductCommand::RetireVariant(RetireVariant {
                product_id,
                variant_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Reprice for future lines. Lines already in carts keep the price they were added at.
    pub fn change_price(&self, product_id: ProductId, price: u64) -> Result<(), CartError> {
        self.execute(
            product_id,
            ProductCommand::ChangePrice(ChangePrice {
                product_id,
                price,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn activate(&self, product_id: ProductId) -> Result<(), CartError> {
        self.execute(
            product_id,
            ProductCommand::ActivateProduct(ActivateProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn archive(&self, product_id: ProductId) -> Result<(), CartError> {
        self.execute(
            product_id,
            ProductCommand::ArchiveProduct(ArchiveProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    fn execute(&self, product_id: ProductId, command: ProductCommand) -> Result<(), CartError> {
        let committed = self
            .dispatcher
            .dispatch(AGGREGATE_TYPE, product_id.0, command, make_product)
            .map_err(|e| with_not_found(e, CartError::ProductNotFound))?;
        self.write_through(&committed);
        Ok(())
    }

    fn write_through(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if let Err(err) = self.catalog.apply_envelope(&stored.to_envelope()) {
                warn!(
                    aggregate_id = %stored.aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = %err,
                    "catalog write-through failed"
                );
            }
        }
    }
}
