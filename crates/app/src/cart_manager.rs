//! Cart line mutations, kept in step with the stock ledger.
//!
//! Ordering rule: stock is reserved before the cart claims it, and released only after the
//! cart has let go. A cart append that loses its compare-and-set therefore only ever has to
//! undo a reservation, which cannot fail on stock grounds.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use stockcart_cart::{
    AddItem, AssignActiveCart, CancelCart, Cart, CartCommand, CartId, CartItem, CartItemId,
    ChangeItemQuantity, OpenCart, OwnerCart, OwnerCartCommand, RemoveItem, AGGREGATE_TYPE,
    OWNER_AGGREGATE_TYPE,
};
use stockcart_catalog::{ProductCatalog, ProductId, VariantId};
use stockcart_core::{AggregateId, OwnerId};
use stockcart_infra::{Attempt, DispatchError, RetryError, RetryPolicy};
use stockcart_inventory::StockKey;

use crate::error::CartError;
use crate::ledger::StockLedger;
use crate::services::Dispatcher;

pub(crate) fn make_cart(id: AggregateId) -> Cart {
    Cart::empty(CartId::new(id))
}

/// Load a cart; a stream that was never opened is `CartNotFound`.
pub(crate) fn load_cart(dispatcher: &Dispatcher, cart_id: CartId) -> Result<Cart, CartError> {
    let cart = dispatcher.load(AGGREGATE_TYPE, cart_id.0, make_cart)?;
    if !cart.is_opened() {
        return Err(CartError::CartNotFound);
    }
    Ok(cart)
}

/// Load a cart that must still be ACTIVE.
pub(crate) fn load_active_cart(dispatcher: &Dispatcher, cart_id: CartId) -> Result<Cart, CartError> {
    let cart = load_cart(dispatcher, cart_id)?;
    if cart.status().is_terminal() {
        return Err(CartError::CartClosed(cart.status().to_string()));
    }
    Ok(cart)
}

pub(crate) fn finish<T>(op: &'static str, outcome: Result<T, RetryError<CartError>>) -> Result<T, CartError> {
    match outcome {
        Ok(v) => Ok(v),
        Err(RetryError::Failed(e)) => Err(e),
        Err(RetryError::Exhausted { attempts }) => {
            warn!(op, attempts, "cart retry budget exhausted");
            Err(CartError::ConcurrentModification)
        }
    }
}

/// Price and stock key of a catalog line, validated for sale.
#[derive(Debug, Clone, Copy)]
struct ResolvedLine {
    unit_price: u64,
    key: StockKey,
}

pub struct CartItemManager {
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<StockLedger>,
    catalog: Arc<dyn ProductCatalog>,
    retry: RetryPolicy,
}

impl CartItemManager {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        ledger: Arc<StockLedger>,
        catalog: Arc<dyn ProductCatalog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            ledger,
            catalog,
            retry,
        }
    }

    pub fn get_cart(&self, cart_id: CartId) -> Result<Cart, CartError> {
        load_cart(&self.dispatcher, cart_id)
    }

    /// Return the owner's ACTIVE cart, opening an empty one if there is none.
    pub fn get_or_create_active_cart(&self, owner_id: OwnerId) -> Result<Cart, CartError> {
        let pointer_id = owner_id.pointer_stream();

        let outcome = self.retry.run(|attempt| {
            let pointer = match self
                .dispatcher
                .load(OWNER_AGGREGATE_TYPE, pointer_id, |_| OwnerCart::empty(owner_id))
            {
                Ok(p) => p,
                Err(e) => return Attempt::Failed(e.into()),
            };

            if let Some(current) = pointer.current() {
                match load_cart(&self.dispatcher, current) {
                    Ok(cart) if cart.is_active() => return Attempt::Done(cart),
                    Ok(_) | Err(CartError::CartNotFound) => {}
                    Err(e) => return Attempt::Failed(e),
                }
            }

            let cart_id = CartId::new(AggregateId::new());
            let opened = self.dispatcher.dispatch(
                AGGREGATE_TYPE,
                cart_id.0,
                CartCommand::Open(OpenCart {
                    cart_id,
                    owner_id,
                    occurred_at: Utc::now(),
                }),
                make_cart,
            );
            if let Err(e) = opened {
                return Attempt::Failed(e.into());
            }

            let assigned = self.dispatcher.dispatch_at(
                &pointer,
                OWNER_AGGREGATE_TYPE,
                pointer_id,
                OwnerCartCommand::Assign(AssignActiveCart {
                    owner_id,
                    cart_id,
                    replaces: pointer.current(),
                    occurred_at: Utc::now(),
                }),
            );

            match assigned {
                Ok(_) => match load_cart(&self.dispatcher, cart_id) {
                    Ok(cart) => {
                        info!(%owner_id, %cart_id, "cart opened");
                        Attempt::Done(cart)
                    }
                    Err(e) => Attempt::Failed(e),
                },
                Err(err) => {
                    self.abandon(cart_id);
                    if err.is_concurrency() {
                        debug!(%owner_id, attempt, "lost active-cart race");
                        Attempt::Conflict
                    } else {
                        Attempt::Failed(err.into())
                    }
                }
            }
        });

        finish("get_or_create_active_cart", outcome)
    }

    /// Add `quantity` of a product (or one of its variants). Merges into an existing line.
    pub fn add_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: i64,
    ) -> Result<CartItem, CartError> {
        if quantity <= 0 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        let line = self.resolve_line(product_id, variant_id)?;

        let outcome = self.retry.run(|_| {
            let cart = match load_active_cart(&self.dispatcher, cart_id) {
                Ok(c) => c,
                Err(e) => return Attempt::Failed(e),
            };

            if let Some(existing) = cart.line_for(product_id, variant_id) {
                // The line already holds `existing.quantity` of the key's counters, so a sum
                // past i64::MAX can never be covered by what is available.
                let Some(target) = existing.quantity.checked_add(quantity) else {
                    let available = self.ledger.get_levels(line.key).map(|l| l.available).unwrap_or(0);
                    return Attempt::Failed(CartError::InsufficientStock {
                        requested: quantity,
                        available,
                    });
                };
                return self.change_quantity_once(&cart, existing, target);
            }

            if let Err(e) = self.ledger.reserve(line.key, quantity) {
                return Attempt::Failed(e);
            }

            let item_id = CartItemId::new(AggregateId::new());
            let cmd = CartCommand::AddItem(AddItem {
                cart_id,
                item_id,
                product_id,
                variant_id,
                quantity,
                unit_price: line.unit_price,
                occurred_at: Utc::now(),
            });

            match self.dispatcher.dispatch_at(&cart, AGGREGATE_TYPE, cart_id.0, cmd) {
                Ok(_) => Attempt::Done(CartItem {
                    item_id,
                    product_id,
                    variant_id,
                    quantity,
                    unit_price: line.unit_price,
                }),
                Err(err) => self.undo_reserve(line.key, quantity, err),
            }
        });

        let item = finish("add_item", outcome)?;
        debug!(%cart_id, item_id = %item.item_id, quantity = item.quantity, "cart line set");
        Ok(item)
    }

    /// Set a line's quantity. Growing reserves the difference first; shrinking releases
    /// it after the cart has recorded the new quantity.
    pub fn update_quantity(&self, cart_id: CartId, item_id: CartItemId, quantity: i64) -> Result<CartItem, CartError> {
        if quantity <= 0 {
            return Err(CartError::InvalidQuantity(quantity));
        }

        let outcome = self.retry.run(|_| {
            let cart = match load_active_cart(&self.dispatcher, cart_id) {
                Ok(c) => c,
                Err(e) => return Attempt::Failed(e),
            };
            match cart.item(item_id) {
                Some(item) => self.change_quantity_once(&cart, item, quantity),
                None => Attempt::Failed(CartError::ItemNotFound),
            }
        });

        finish("update_quantity", outcome)
    }

    /// Drop a line and release everything it held.
    pub fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<(), CartError> {
        let outcome = self.retry.run(|_| {
            let cart = match load_active_cart(&self.dispatcher, cart_id) {
                Ok(c) => c,
                Err(e) => return Attempt::Failed(e),
            };
            let Some(item) = cart.item(item_id).cloned() else {
                return Attempt::Failed(CartError::ItemNotFound);
            };

            let cmd = CartCommand::RemoveItem(RemoveItem {
                cart_id,
                item_id,
                occurred_at: Utc::now(),
            });
            match self.dispatcher.dispatch_at(&cart, AGGREGATE_TYPE, cart_id.0, cmd) {
                Ok(_) => match self.ledger.release_owed(item.stock_key(), item.quantity) {
                    Ok(_) => Attempt::Done(()),
                    Err(e) => Attempt::Failed(e),
                },
                Err(err) if err.is_concurrency() => Attempt::Conflict,
                Err(err) => Attempt::Failed(err.into()),
            }
        });

        finish("remove_item", outcome)
    }

    /// One compare-and-set attempt at moving `item` to `target`.
    fn change_quantity_once(&self, cart: &Cart, item: &CartItem, target: i64) -> Attempt<CartItem, CartError> {
        let delta = target - item.quantity;
        if delta == 0 {
            return Attempt::Done(item.clone());
        }

        let key = item.stock_key();
        if delta > 0 {
            if let Err(e) = self.ledger.reserve(key, delta) {
                return Attempt::Failed(e);
            }
        }

        let cart_id = cart.id_typed();
        let cmd = CartCommand::ChangeItemQuantity(ChangeItemQuantity {
            cart_id,
            item_id: item.item_id,
            quantity: target,
            occurred_at: Utc::now(),
        });

        match self.dispatcher.dispatch_at(cart, AGGREGATE_TYPE, cart_id.0, cmd) {
            Ok(_) => {
                if delta < 0 {
                    if let Err(e) = self.ledger.release_owed(key, -delta) {
                        return Attempt::Failed(e);
                    }
                }
                Attempt::Done(CartItem {
                    quantity: target,
                    ..item.clone()
                })
            }
            Err(err) if delta > 0 => self.undo_reserve(key, delta, err),
            Err(err) if err.is_concurrency() => Attempt::Conflict,
            Err(err) => Attempt::Failed(err.into()),
        }
    }

    /// The cart append failed after `quantity` was reserved: give it back.
    fn undo_reserve<T>(&self, key: StockKey, quantity: i64, err: DispatchError) -> Attempt<T, CartError> {
        if let Err(release_err) = self.ledger.release_owed(key, quantity) {
            return Attempt::Failed(release_err);
        }
        if err.is_concurrency() {
            warn!(%key, quantity, "cart moved under a reservation, released and retrying");
            Attempt::Conflict
        } else {
            Attempt::Failed(err.into())
        }
    }

    /// Best-effort cancel of a cart that lost the active-cart race. It is empty.
    fn abandon(&self, cart_id: CartId) {
        let res = self.dispatcher.dispatch(
            AGGREGATE_TYPE,
            cart_id.0,
            CartCommand::Cancel(CancelCart {
                cart_id,
                occurred_at: Utc::now(),
            }),
            make_cart,
        );
        if let Err(e) = res {
            warn!(%cart_id, error = %e, "failed to cancel abandoned cart");
        }
    }

    fn resolve_line(&self, product_id: ProductId, variant_id: Option<VariantId>) -> Result<ResolvedLine, CartError> {
        let product = self.catalog.get_product(product_id).ok_or(CartError::ProductNotFound)?;

        match (product.has_variants, variant_id) {
            (true, None) => Err(CartError::VariantRequired),
            (false, Some(_)) => Err(CartError::VariantNotAllowed),
            (true, Some(v)) => {
                let variant = self
                    .catalog
                    .get_variant(v)
                    .filter(|view| view.product_id == product_id)
                    .ok_or(CartError::ProductNotFound)?;
                if !variant.is_active {
                    return Err(CartError::ProductUnavailable);
                }
                Ok(ResolvedLine {
                    unit_price: variant.price,
                    key: StockKey::for_variant(v),
                })
            }
            (false, None) => {
                if !product.is_active {
                    return Err(CartError::ProductUnavailable);
                }
                Ok(ResolvedLine {
                    unit_price: product.price,
                    key: StockKey::for_product(product_id),
                })
            }
        }
    }
}

impl core::fmt::Debug for CartItemManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CartItemManager").field("retry", &self.retry).finish()
    }
}

