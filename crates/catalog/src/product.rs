use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockcart_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use stockcart_events::Event;

/// Stream type for product aggregates.
pub const AGGREGATE_TYPE: &str = "catalog.product";

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Variant identifier (e.g. one size of a shirt).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(pub AggregateId);

impl VariantId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for VariantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

/// A purchasable configuration of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: VariantId,
    pub label: String,
    /// Price in smallest currency unit; falls back to the product price when `None`.
    pub price_override: Option<u64>,
    pub retired: bool,
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    status: ProductStatus,
    /// Price in smallest currency unit (e.g. cents).
    price: u64,
    variants: Vec<Variant>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            sku: String::new(),
            name: String::new(),
            status: ProductStatus::Draft,
            price: 0,
            variants: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn has_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    pub fn variant(&self, variant_id: VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }

    /// Effective price of a variant (override, else product price).
    pub fn variant_price(&self, variant: &Variant) -> u64 {
        variant.price_override.unwrap_or(self.price)
    }

    /// Only active products can be put in a cart.
    pub fn can_be_sold(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddVariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVariant {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub label: String,
    pub price_override: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RetireVariant (stop selling one variant, keep the rest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireVariant {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangePrice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePrice {
    pub product_id: ProductId,
    pub price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ActivateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateProduct {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    AddVariant(AddVariant),
    RetireVariant(RetireVariant),
    ChangePrice(ChangePrice),
    ActivateProduct(ActivateProduct),
    ArchiveProduct(ArchiveProduct),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariantAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAdded {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub label: String,
    pub price_override: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariantRetired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRetired {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PriceChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChanged {
    pub product_id: ProductId,
    pub old_price: u64,
    pub new_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    VariantAdded(VariantAdded),
    VariantRetired(VariantRetired),
    PriceChanged(PriceChanged),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
}

impl ProductEvent {
    pub fn product_id(&self) -> ProductId {
        match self {
            ProductEvent::ProductCreated(e) => e.product_id,
            ProductEvent::VariantAdded(e) => e.product_id,
            ProductEvent::VariantRetired(e) => e.product_id,
            ProductEvent::PriceChanged(e) => e.product_id,
            ProductEvent::ProductActivated(e) => e.product_id,
            ProductEvent::ProductArchived(e) => e.product_id,
        }
    }
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::VariantAdded(_) => "catalog.product.variant_added",
            ProductEvent::VariantRetired(_) => "catalog.product.variant_retired",
            ProductEvent::PriceChanged(_) => "catalog.product.price_changed",
            ProductEvent::ProductActivated(_) => "catalog.product.activated",
            ProductEvent::ProductArchived(_) => "catalog.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::VariantAdded(e) => e.occurred_at,
            ProductEvent::VariantRetired(e) => e.occurred_at,
            ProductEvent::PriceChanged(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.price = e.price;
                self.status = ProductStatus::Draft;
                self.created = true;
            }
            ProductEvent::VariantAdded(e) => {
                self.variants.push(Variant {
                    variant_id: e.variant_id,
                    label: e.label.clone(),
                    price_override: e.price_override,
                    retired: false,
                });
            }
            ProductEvent::VariantRetired(e) => {
                if let Some(v) = self.variants.iter_mut().find(|v| v.variant_id == e.variant_id) {
                    v.retired = true;
                }
            }
            ProductEvent::PriceChanged(e) => {
                self.price = e.new_price;
            }
            ProductEvent::ProductActivated(_) => {
                self.status = ProductStatus::Active;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::AddVariant(cmd) => self.handle_add_variant(cmd),
            ProductCommand::RetireVariant(cmd) => self.handle_retire_variant(cmd),
            ProductCommand::ChangePrice(cmd) => self.handle_change_price(cmd),
            ProductCommand::ActivateProduct(cmd) => self.handle_activate(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Product {
    fn ensure_existing(&self, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            product_id: cmd.product_id,
            sku: cmd.sku.clone(),
            name: cmd.name.clone(),
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_variant(&self, cmd: &AddVariant) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot gain variants"));
        }
        // Turning a flat-stock product into a variant product while it is on sale would
        // strand the flat reservations of open carts.
        if self.status == ProductStatus::Active && !self.has_variants() {
            return Err(DomainError::invariant(
                "an active product without variants cannot gain variants",
            ));
        }
        if cmd.label.trim().is_empty() {
            return Err(DomainError::validation("variant label cannot be empty"));
        }
        if self.variant(cmd.variant_id).is_some() {
            return Err(DomainError::conflict("variant already exists"));
        }
        if self.variants.iter().any(|v| v.label == cmd.label) {
            return Err(DomainError::conflict(format!(
                "variant label '{}' already used",
                cmd.label
            )));
        }

        Ok(vec![ProductEvent::VariantAdded(VariantAdded {
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            label: cmd.label.clone(),
            price_override: cmd.price_override,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_retire_variant(&self, cmd: &RetireVariant) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.product_id)?;

        let variant = self.variant(cmd.variant_id).ok_or(DomainError::NotFound)?;
        if variant.retired {
            return Err(DomainError::conflict("variant is already retired"));
        }

        Ok(vec![ProductEvent::VariantRetired(VariantRetired {
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_price(&self, cmd: &ChangePrice) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be repriced"));
        }
        if cmd.price == self.price {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::PriceChanged(PriceChanged {
            product_id: cmd.product_id,
            old_price: self.price,
            new_price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.product_id)?;

        if self.status == ProductStatus::Active {
            return Err(DomainError::conflict("product is already active"));
        }
        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be activated"));
        }

        Ok(vec![ProductEvent::ProductActivated(ProductActivated {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_variant_id() -> VariantId {
        VariantId::new(AggregateId::new())
    }

    fn run(product: &mut Product, cmd: ProductCommand) -> Result<Vec<ProductEvent>, DomainError> {
        let events = product.handle(&cmd)?;
        for e in &events {
            product.apply(e);
        }
        Ok(events)
    }

    fn created(price: u64) -> Product {
        let id = test_product_id();
        let mut product = Product::empty(id);
        run(
            &mut product,
            ProductCommand::CreateProduct(CreateProduct {
                product_id: id,
                sku: "TEE-001".to_string(),
                name: "Club Tee".to_string(),
                price,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        product
    }

    fn add_variant(product: &mut Product, label: &str, price_override: Option<u64>) -> Result<VariantId, DomainError> {
        let variant_id = test_variant_id();
        run(
            product,
            ProductCommand::AddVariant(AddVariant {
                product_id: product.id_typed(),
                variant_id,
                label: label.to_string(),
                price_override,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(variant_id)
    }

    fn activate(product: &mut Product) -> Result<Vec<ProductEvent>, DomainError> {
        let product_id = product.id_typed();
        run(
            product,
            ProductCommand::ActivateProduct(ActivateProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    #[test]
    fn create_product_emits_product_created_event() {
        let product = Product::empty(test_product_id());
        let product_id = test_product_id();
        let cmd = CreateProduct {
            product_id,
            sku: "SKU-001".to_string(),
            name: "Test Product".to_string(),
            price: 1999,
            occurred_at: Utc::now(),
        };

        let events = product.handle(&ProductCommand::CreateProduct(cmd)).unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            ProductEvent::ProductCreated(e) => {
                assert_eq!(e.product_id, product_id);
                assert_eq!(e.sku, "SKU-001");
                assert_eq!(e.price, 1999);
            }
            _ => panic!("Expected ProductCreated event"),
        }
    }

    #[test]
    fn create_product_rejects_empty_name() {
        let product = Product::empty(test_product_id());
        let cmd = CreateProduct {
            product_id: test_product_id(),
            sku: "SKU-001".to_string(),
            name: "   ".to_string(),
            price: 100,
            occurred_at: Utc::now(),
        };

        let err = product.handle(&ProductCommand::CreateProduct(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_product_rejects_duplicate_creation() {
        let product = created(100);
        let cmd = CreateProduct {
            product_id: product.id_typed(),
            sku: "SKU-002".to_string(),
            name: "Again".to_string(),
            price: 100,
            occurred_at: Utc::now(),
        };

        let err = product.handle(&ProductCommand::CreateProduct(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn variants_inherit_product_price_unless_overridden() {
        let mut product = created(2500);
        let m = add_variant(&mut product, "M", None).unwrap();
        let xl = add_variant(&mut product, "XL", Some(2800)).unwrap();

        let m = product.variant(m).unwrap().clone();
        let xl = product.variant(xl).unwrap().clone();
        assert_eq!(product.variant_price(&m), 2500);
        assert_eq!(product.variant_price(&xl), 2800);
        assert!(product.has_variants());
    }

    #[test]
    fn duplicate_variant_label_is_rejected() {
        let mut product = created(2500);
        add_variant(&mut product, "M", None).unwrap();

        let err = add_variant(&mut product, "M", None).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn active_flat_product_cannot_gain_variants() {
        let mut product = created(900);
        activate(&mut product).unwrap();

        let err = add_variant(&mut product, "S", None).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn active_variant_product_can_gain_more_variants() {
        let mut product = created(900);
        add_variant(&mut product, "S", None).unwrap();
        activate(&mut product).unwrap();

        assert!(add_variant(&mut product, "M", None).is_ok());
        assert_eq!(product.variants().len(), 2);
    }

    #[test]
    fn retire_variant_marks_it_retired() {
        let mut product = created(900);
        let s = add_variant(&mut product, "S", None).unwrap();
        let product_id = product.id_typed();

        run(
            &mut product,
            ProductCommand::RetireVariant(RetireVariant {
                product_id,
                variant_id: s,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert!(product.variant(s).unwrap().retired);
    }

    #[test]
    fn change_price_to_same_value_is_a_no_op() {
        let product = created(500);
        let events = product
            .handle(&ProductCommand::ChangePrice(ChangePrice {
                product_id: product.id_typed(),
                price: 500,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn archived_products_cannot_be_sold_or_reactivated() {
        let mut product = created(500);
        activate(&mut product).unwrap();
        assert!(product.can_be_sold());

        let product_id = product.id_typed();
        run(
            &mut product,
            ProductCommand::ArchiveProduct(ArchiveProduct {
                product_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert!(!product.can_be_sold());
        let err = activate(&mut product).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn commands_on_missing_product_are_not_found() {
        let product = Product::empty(test_product_id());
        let err = product
            .handle(&ProductCommand::ActivateProduct(ActivateProduct {
                product_id: product.id_typed(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Handle never mutates state, so rejected commands leave no trace.
            #[test]
            fn handle_is_side_effect_free(
                price in 0u64..1_000_000,
                label in "[A-Z]{1,4}"
            ) {
                let mut product = created(price);
                add_variant(&mut product, &label, None).unwrap();
                let before = product.clone();

                let cmd = ProductCommand::AddVariant(AddVariant {
                    product_id: product.id_typed(),
                    variant_id: test_variant_id(),
                    label: label.clone(),
                    price_override: None,
                    occurred_at: Utc::now(),
                });
                let first = product.handle(&cmd);
                let second = product.handle(&cmd);

                prop_assert!(first.is_err());
                prop_assert_eq!(first, second);
                prop_assert_eq!(&before, &product);
            }

            /// Version counts applied events.
            #[test]
            fn version_counts_applied_events(labels in proptest::collection::hash_set("[A-Z]{1,3}", 0..6)) {
                let mut product = created(100);
                for label in &labels {
                    add_variant(&mut product, label, None).unwrap();
                }
                prop_assert_eq!(product.version(), 1 + labels.len() as u64);
            }
        }
    }
}
