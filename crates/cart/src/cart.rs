use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockcart_catalog::{ProductId, VariantId};
use stockcart_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Entity, OwnerId};
use stockcart_events::Event;
use stockcart_inventory::StockKey;

/// Stream type for carts.
pub const AGGREGATE_TYPE: &str = "cart";

/// Cart identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartId(pub AggregateId);

impl CartId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CartId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Cart line identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartItemId(pub AggregateId);

impl CartItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CartItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Cart lifecycle. `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartStatus {
    Active,
    CheckedOut,
    Canceled,
    Expired,
}

impl CartStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CartStatus::Active)
    }
}

impl core::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            CartStatus::Active => "ACTIVE",
            CartStatus::CheckedOut => "CHECKED_OUT",
            CartStatus::Canceled => "CANCELED",
            CartStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// One cart line. Unique per (product, variant) within a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub item_id: CartItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    /// Price captured when the line was first added (smallest currency unit).
    pub unit_price: u64,
}

impl CartItem {
    pub fn stock_key(&self) -> StockKey {
        StockKey::for_line(self.product_id, self.variant_id)
    }

    pub fn line_total(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity.max(0) as u64)
    }

    fn same_line(&self, product_id: ProductId, variant_id: Option<VariantId>) -> bool {
        self.product_id == product_id && self.variant_id == variant_id
    }
}

impl Entity for CartItem {
    type Id = CartItemId;

    fn id(&self) -> &Self::Id {
        &self.item_id
    }
}

/// Aggregate root: Cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    id: CartId,
    owner_id: Option<OwnerId>,
    status: CartStatus,
    items: Vec<CartItem>,
    created_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Cart {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: CartId) -> Self {
        Self {
            id,
            owner_id: None,
            status: CartStatus::Active,
            items: Vec::new(),
            created_at: None,
            last_activity_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CartId {
        self.id
    }

    pub fn is_opened(&self) -> bool {
        self.created
    }

    pub fn owner_id(&self) -> Option<OwnerId> {
        self.owner_id
    }

    pub fn status(&self) -> CartStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.created && self.status == CartStatus::Active
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn item(&self, item_id: CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    /// The existing line for (product, variant), if any.
    pub fn line_for(&self, product_id: ProductId, variant_id: Option<VariantId>) -> Option<&CartItem> {
        self.items.iter().find(|i| i.same_line(product_id, variant_id))
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.last_activity_at
    }

    pub fn total(&self) -> u64 {
        self.items.iter().map(CartItem::line_total).sum()
    }
}

impl AggregateRoot for Cart {
    type Id = CartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCart {
    pub cart_id: CartId,
    pub owner_id: OwnerId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem (a new line; merging into an existing line is a quantity change).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub cart_id: CartId,
    pub item_id: CartItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeItemQuantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItemQuantity {
    pub cart_id: CartId,
    pub item_id: CartItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub cart_id: CartId,
    pub item_id: CartItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CheckOutCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutCart {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCart {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireCart. Only succeeds if the cart has been idle since before `idle_before`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireCart {
    pub cart_id: CartId,
    pub idle_before: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCommand {
    Open(OpenCart),
    AddItem(AddItem),
    ChangeItemQuantity(ChangeItemQuantity),
    RemoveItem(RemoveItem),
    CheckOut(CheckOutCart),
    Cancel(CancelCart),
    Expire(ExpireCart),
}

/// Event: CartOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOpened {
    pub cart_id: CartId,
    pub owner_id: OwnerId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub cart_id: CartId,
    pub item: CartItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemQuantityChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantityChanged {
    pub cart_id: CartId,
    pub item_id: CartItemId,
    pub previous: i64,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub cart_id: CartId,
    pub item_id: CartItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CartCheckedOut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCheckedOut {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CartCanceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCanceled {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CartExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartExpired {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartEvent {
    CartOpened(CartOpened),
    ItemAdded(ItemAdded),
    ItemQuantityChanged(ItemQuantityChanged),
    ItemRemoved(ItemRemoved),
    CartCheckedOut(CartCheckedOut),
    CartCanceled(CartCanceled),
    CartExpired(CartExpired),
}

impl CartEvent {
    pub fn cart_id(&self) -> CartId {
        match self {
            CartEvent::CartOpened(e) => e.cart_id,
            CartEvent::ItemAdded(e) => e.cart_id,
            CartEvent::ItemQuantityChanged(e) => e.cart_id,
            CartEvent::ItemRemoved(e) => e.cart_id,
            CartEvent::CartCheckedOut(e) => e.cart_id,
            CartEvent::CartCanceled(e) => e.cart_id,
            CartEvent::CartExpired(e) => e.cart_id,
        }
    }

    /// The status a cart has after this event.
    pub fn resulting_status(&self) -> CartStatus {
        match self {
            CartEvent::CartCheckedOut(_) => CartStatus::CheckedOut,
            CartEvent::CartCanceled(_) => CartStatus::Canceled,
            CartEvent::CartExpired(_) => CartStatus::Expired,
            _ => CartStatus::Active,
        }
    }
}

impl Event for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartOpened(_) => "cart.opened",
            CartEvent::ItemAdded(_) => "cart.item_added",
            CartEvent::ItemQuantityChanged(_) => "cart.item_quantity_changed",
            CartEvent::ItemRemoved(_) => "cart.item_removed",
            CartEvent::CartCheckedOut(_) => "cart.checked_out",
            CartEvent::CartCanceled(_) => "cart.canceled",
            CartEvent::CartExpired(_) => "cart.expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::CartOpened(e) => e.occurred_at,
            CartEvent::ItemAdded(e) => e.occurred_at,
            CartEvent::ItemQuantityChanged(e) => e.occurred_at,
            CartEvent::ItemRemoved(e) => e.occurred_at,
            CartEvent::CartCheckedOut(e) => e.occurred_at,
            CartEvent::CartCanceled(e) => e.occurred_at,
            CartEvent::CartExpired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Cart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::CartOpened(e) => {
                self.id = e.cart_id;
                self.owner_id = Some(e.owner_id);
                self.status = CartStatus::Active;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            CartEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
            }
            CartEvent::ItemQuantityChanged(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.item_id == e.item_id) {
                    item.quantity = e.quantity;
                }
            }
            CartEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.item_id != e.item_id);
            }
            CartEvent::CartCheckedOut(_) | CartEvent::CartCanceled(_) | CartEvent::CartExpired(_) => {
                self.status = event.resulting_status();
            }
        }

        self.last_activity_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::Open(cmd) => self.handle_open(cmd),
            CartCommand::AddItem(cmd) => self.handle_add_item(cmd),
            CartCommand::ChangeItemQuantity(cmd) => self.handle_change_quantity(cmd),
            CartCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            CartCommand::CheckOut(cmd) => self.handle_check_out(cmd),
            CartCommand::Cancel(cmd) => self.handle_cancel(cmd),
            CartCommand::Expire(cmd) => self.handle_expire(cmd),
        }
    }
}

impl Cart {
    /// Every mutation and every transition requires an opened, ACTIVE cart.
    fn ensure_active(&self, cart_id: CartId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != cart_id {
            return Err(DomainError::invariant("cart_id mismatch"));
        }
        if self.status.is_terminal() {
            return Err(DomainError::cart_closed(self.status));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenCart) -> Result<Vec<CartEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("cart already exists"));
        }

        Ok(vec![CartEvent::CartOpened(CartOpened {
            cart_id: cmd.cart_id,
            owner_id: cmd.owner_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_active(cmd.cart_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::InvalidQuantity(cmd.quantity));
        }
        if self.line_for(cmd.product_id, cmd.variant_id).is_some() {
            return Err(DomainError::conflict("cart already has a line for this product/variant"));
        }
        if self.item(cmd.item_id).is_some() {
            return Err(DomainError::conflict("cart item id already used"));
        }

        Ok(vec![CartEvent::ItemAdded(ItemAdded {
            cart_id: cmd.cart_id,
            item: CartItem {
                item_id: cmd.item_id,
                product_id: cmd.product_id,
                variant_id: cmd.variant_id,
                quantity: cmd.quantity,
                unit_price: cmd.unit_price,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_quantity(&self, cmd: &ChangeItemQuantity) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_active(cmd.cart_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::InvalidQuantity(cmd.quantity));
        }
        let item = self.item(cmd.item_id).ok_or(DomainError::ItemNotFound)?;
        if item.quantity == cmd.quantity {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::ItemQuantityChanged(ItemQuantityChanged {
            cart_id: cmd.cart_id,
            item_id: cmd.item_id,
            previous: item.quantity,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_active(cmd.cart_id)?;

        let item = self.item(cmd.item_id).ok_or(DomainError::ItemNotFound)?;

        Ok(vec![CartEvent::ItemRemoved(ItemRemoved {
            cart_id: cmd.cart_id,
            item_id: cmd.item_id,
            quantity: item.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_check_out(&self, cmd: &CheckOutCart) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_active(cmd.cart_id)?;

        if self.items.is_empty() {
            return Err(DomainError::validation("cannot check out an empty cart"));
        }

        Ok(vec![CartEvent::CartCheckedOut(CartCheckedOut {
            cart_id: cmd.cart_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelCart) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_active(cmd.cart_id)?;

        Ok(vec![CartEvent::CartCanceled(CartCanceled {
            cart_id: cmd.cart_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireCart) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_active(cmd.cart_id)?;

        match self.last_activity_at {
            Some(last) if last < cmd.idle_before => {}
            _ => return Err(DomainError::conflict("cart had recent activity")),
        }

        Ok(vec![CartEvent::CartExpired(CartExpired {
            cart_id: cmd.cart_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_cart_id() -> CartId {
        CartId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn exec(cart: &mut Cart, cmd: CartCommand) -> Result<Vec<CartEvent>, DomainError> {
        let events = cart.handle(&cmd)?;
        for e in &events {
            cart.apply(e);
        }
        Ok(events)
    }

    fn opened() -> Cart {
        let cart_id = test_cart_id();
        let mut cart = Cart::empty(cart_id);
        exec(
            &mut cart,
            CartCommand::Open(OpenCart {
                cart_id,
                owner_id: OwnerId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        cart
    }

    fn add(cart: &mut Cart, product_id: ProductId, quantity: i64) -> Result<CartItemId, DomainError> {
        let item_id = CartItemId::new(AggregateId::new());
        let cart_id = cart.id_typed();
        exec(
            cart,
            CartCommand::AddItem(AddItem {
                cart_id,
                item_id,
                product_id,
                variant_id: None,
                quantity,
                unit_price: 250,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(item_id)
    }

    fn cancel(cart: &mut Cart) -> Result<Vec<CartEvent>, DomainError> {
        let cart_id = cart.id_typed();
        exec(
            cart,
            CartCommand::Cancel(CancelCart {
                cart_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    #[test]
    fn open_cart_is_active_and_empty() {
        let cart = opened();
        assert!(cart.is_active());
        assert!(cart.items().is_empty());
        assert_eq!(cart.version(), 1);
        assert_eq!(cart.created_at(), cart.last_activity_at());
    }

    #[test]
    fn add_item_records_price_snapshot() {
        let mut cart = opened();
        let product_id = test_product_id();
        let item_id = add(&mut cart, product_id, 2).unwrap();

        let item = cart.item(item_id).unwrap();
        assert_eq!(item.quantity, 2);
        assert_eq!(item.unit_price, 250);
        assert_eq!(cart.total(), 500);
    }

    #[test]
    fn duplicate_line_is_rejected() {
        let mut cart = opened();
        let product_id = test_product_id();
        add(&mut cart, product_id, 1).unwrap();

        let err = add(&mut cart, product_id, 1).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(cart.items().len(), 1);
    }

    #[test]
    fn non_positive_quantity_is_invalid() {
        let mut cart = opened();
        let product_id = test_product_id();
        assert_eq!(add(&mut cart, product_id, 0).unwrap_err(), DomainError::InvalidQuantity(0));

        let item_id = add(&mut cart, product_id, 1).unwrap();
        let cart_id = cart.id_typed();
        let err = exec(
            &mut cart,
            CartCommand::ChangeItemQuantity(ChangeItemQuantity {
                cart_id,
                item_id,
                quantity: -3,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::InvalidQuantity(-3));
    }

    #[test]
    fn change_quantity_records_previous_value() {
        let mut cart = opened();
        let item_id = add(&mut cart, test_product_id(), 1).unwrap();
        let cart_id = cart.id_typed();

        let events = exec(
            &mut cart,
            CartCommand::ChangeItemQuantity(ChangeItemQuantity {
                cart_id,
                item_id,
                quantity: 4,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        match &events[0] {
            CartEvent::ItemQuantityChanged(e) => {
                assert_eq!(e.previous, 1);
                assert_eq!(e.quantity, 4);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(cart.item(item_id).unwrap().quantity, 4);
    }

    #[test]
    fn remove_unknown_item_is_item_not_found() {
        let mut cart = opened();
        let cart_id = cart.id_typed();
        let err = exec(
            &mut cart,
            CartCommand::RemoveItem(RemoveItem {
                cart_id,
                item_id: CartItemId::new(AggregateId::new()),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::ItemNotFound);
    }

    #[test]
    fn terminal_cart_rejects_everything_with_cart_closed() {
        let mut cart = opened();
        let product_id = test_product_id();
        add(&mut cart, product_id, 1).unwrap();
        cancel(&mut cart).unwrap();
        assert_eq!(cart.status(), CartStatus::Canceled);

        assert!(matches!(add(&mut cart, test_product_id(), 1), Err(DomainError::CartClosed(_))));
        assert!(matches!(cancel(&mut cart), Err(DomainError::CartClosed(_))));

        let cart_id = cart.id_typed();
        let err = exec(
            &mut cart,
            CartCommand::CheckOut(CheckOutCart {
                cart_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::CartClosed("CANCELED".to_string()));
    }

    #[test]
    fn empty_cart_cannot_be_checked_out() {
        let cart = opened();
        let err = cart
            .handle(&CartCommand::CheckOut(CheckOutCart {
                cart_id: cart.id_typed(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn expire_requires_idleness() {
        let cart = opened();
        let last = cart.last_activity_at().unwrap();

        let recent = cart.handle(&CartCommand::Expire(ExpireCart {
            cart_id: cart.id_typed(),
            idle_before: last,
            occurred_at: Utc::now(),
        }));
        assert!(matches!(recent, Err(DomainError::Conflict(_))));

        let events = cart
            .handle(&CartCommand::Expire(ExpireCart {
                cart_id: cart.id_typed(),
                idle_before: last + Duration::seconds(1),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert_eq!(events[0].resulting_status(), CartStatus::Expired);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Quantity changes leave exactly one line with the last quantity.
            #[test]
            fn quantity_changes_keep_one_line(first in 1i64..20, changes in proptest::collection::vec(1i64..20, 0..10)) {
                let mut cart = opened();
                let product_id = test_product_id();
                let item_id = add(&mut cart, product_id, first).unwrap();
                let cart_id = cart.id_typed();

                for q in &changes {
                    exec(&mut cart, CartCommand::ChangeItemQuantity(ChangeItemQuantity {
                        cart_id,
                        item_id,
                        quantity: *q,
                        occurred_at: Utc::now(),
                    })).unwrap();
                }

                prop_assert_eq!(cart.items().len(), 1);
                let expected = changes.last().copied().unwrap_or(first);
                prop_assert_eq!(cart.line_for(product_id, None).unwrap().quantity, expected);
            }
        }
    }
}
