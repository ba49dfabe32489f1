//! Product catalog (event-sourced).
//!
//! The cart core only ever reads from the catalog: product/variant existence, the current
//! price and whether the item can be sold. The `Product` aggregate is where those facts are
//! decided; `InMemoryCatalog` is the read side the cart consults.

pub mod catalog;
pub mod product;

pub use catalog::{CatalogProjectionError, InMemoryCatalog, ProductCatalog, ProductView, VariantView};
pub use product::{
    ActivateProduct, AddVariant, ArchiveProduct, ChangePrice, CreateProduct, PriceChanged,
    Product, ProductActivated, ProductArchived, ProductCommand, ProductCreated, ProductEvent,
    ProductId, ProductStatus, RetireVariant, Variant, VariantAdded, VariantId, VariantRetired,
    AGGREGATE_TYPE,
};
