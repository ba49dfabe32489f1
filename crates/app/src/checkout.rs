//! Checkout and cancellation.
//!
//! The cart's status transition is the single point of decision: whoever moves the cart out
//! of ACTIVE first owns its lines and settles them against the ledger. Every other checkout,
//! cancel or expiry of the same cart fails its compare-and-set and sees the closed cart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use stockcart_cart::{
    CancelCart, Cart, CartCommand, CartId, CartItem, CartItemId, CheckOutCart, AGGREGATE_TYPE,
};
use stockcart_catalog::{ProductId, VariantId};
use stockcart_core::OwnerId;
use stockcart_infra::{Attempt, RetryPolicy};

use crate::cart_manager::{finish, load_active_cart};
use crate::error::CartError;
use crate::ledger::StockLedger;
use crate::services::Dispatcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub item_id: CartItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    pub unit_price: u64,
    pub line_total: u64,
}

/// What a successful checkout hands to order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub cart_id: CartId,
    pub owner_id: Option<OwnerId>,
    pub lines: Vec<OrderLine>,
    pub total: u64,
    pub checked_out_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settle {
    Commit,
    Release,
}

/// Commit or release every line of a cart that has just left ACTIVE.
///
/// All lines are attempted even if one fails; the first failure is returned.
pub(crate) fn settle_lines(
    ledger: &StockLedger,
    cart_id: CartId,
    items: &[CartItem],
    how: Settle,
) -> Result<(), CartError> {
    let mut first_err = None;

    for item in items {
        let res = match how {
            Settle::Commit => ledger.commit_owed(item.stock_key(), item.quantity),
            Settle::Release => ledger.release_owed(item.stock_key(), item.quantity),
        };
        if let Err(err) = res {
            error!(
                %cart_id,
                item_id = %item.item_id,
                quantity = item.quantity,
                ?how,
                error = %err,
                "failed to settle cart line"
            );
            first_err.get_or_insert(err);
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

pub struct CheckoutCoordinator {
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<StockLedger>,
    retry: RetryPolicy,
}

impl CheckoutCoordinator {
    pub fn new(dispatcher: Arc<Dispatcher>, ledger: Arc<StockLedger>, retry: RetryPolicy) -> Self {
        Self {
            dispatcher,
            ledger,
            retry,
        }
    }

    /// Close the cart as CHECKED_OUT and turn every reservation into a committed sale.
    pub fn checkout(&self, cart_id: CartId) -> Result<OrderSummary, CartError> {
        let outcome = self.retry.run(|_| {
            let cart = match load_active_cart(&self.dispatcher, cart_id) {
                Ok(c) => c,
                Err(e) => return Attempt::Failed(e),
            };
            if cart.items().is_empty() {
                return Attempt::Failed(CartError::EmptyCart);
            }

            let checked_out_at = Utc::now();
            let cmd = CartCommand::CheckOut(CheckOutCart {
                cart_id,
                occurred_at: checked_out_at,
            });
            match self.dispatcher.dispatch_at(&cart, AGGREGATE_TYPE, cart_id.0, cmd) {
                Ok(_) => Attempt::Done((cart, checked_out_at)),
                Err(err) if err.is_concurrency() => Attempt::Conflict,
                Err(err) => Attempt::Failed(err.into()),
            }
        });
        let (cart, checked_out_at) = finish("checkout", outcome)?;

        settle_lines(&self.ledger, cart_id, cart.items(), Settle::Commit)?;

        let summary = summarize(&cart, checked_out_at);
        info!(%cart_id, lines = summary.lines.len(), total = summary.total, "cart checked out");
        Ok(summary)
    }

    /// Close the cart as CANCELED and return all of its reservations.
    pub fn cancel(&self, cart_id: CartId) -> Result<(), CartError> {
        let outcome = self.retry.run(|_| {
            let cart = match load_active_cart(&self.dispatcher, cart_id) {
                Ok(c) => c,
                Err(e) => return Attempt::Failed(e),
            };
            let cmd = CartCommand::Cancel(CancelCart {
                cart_id,
                occurred_at: Utc::now(),
            });
            match self.dispatcher.dispatch_at(&cart, AGGREGATE_TYPE, cart_id.0, cmd) {
                Ok(_) => Attempt::Done(cart),
                Err(err) if err.is_concurrency() => Attempt::Conflict,
                Err(err) => Attempt::Failed(err.into()),
            }
        });
        let cart = finish("cancel", outcome)?;

        settle_lines(&self.ledger, cart_id, cart.items(), Settle::Release)?;
        info!(%cart_id, lines = cart.items().len(), "cart canceled");
        Ok(())
    }
}

fn summarize(cart: &Cart, checked_out_at: DateTime<Utc>) -> OrderSummary {
    let lines: Vec<OrderLine> = cart
        .items()
        .iter()
        .map(|i| OrderLine {
            item_id: i.item_id,
            product_id: i.product_id,
            variant_id: i.variant_id,
            quantity: i.quantity,
            unit_price: i.unit_price,
            line_total: i.line_total(),
        })
        .collect();

    OrderSummary {
        cart_id: cart.id_typed(),
        owner_id: cart.owner_id(),
        total: lines.iter().map(|l| l.line_total).sum(),
        lines,
        checked_out_at,
    }
}

impl core::fmt::Debug for CheckoutCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CheckoutCoordinator").field("retry", &self.retry).finish()
    }
}

#[cfg(test)]
mod tests {
    use stockcart_core::OwnerId;
    use stockcart_inventory::StockKey;

    use super::*;
    use crate::config::AppConfig;
    use crate::services::Services;

    fn stocked_product(services: &Services, qty: i64) -> ProductId {
        let pid = services.products.create_product("SKU", "Lamp", 500).unwrap();
        services.products.activate(pid).unwrap();
        services.ledger.register(StockKey::for_product(pid), qty).unwrap();
        pid
    }

    #[test]
    fn checkout_commits_every_line() {
        let services = Services::in_memory(AppConfig::default());
        let pid = stocked_product(&services, 10);
        let cart = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap();
        services.carts.add_item(cart.id_typed(), pid, None, 3).unwrap();

        let order = services.checkout.checkout(cart.id_typed()).unwrap();
        assert_eq!(order.total, 1500);
        assert_eq!(order.lines.len(), 1);

        let levels = services.ledger.get_levels(StockKey::for_product(pid)).unwrap();
        assert_eq!((levels.available, levels.reserved, levels.committed), (7, 0, 3));
    }

    #[test]
    fn empty_cart_cannot_be_checked_out() {
        let services = Services::in_memory(AppConfig::default());
        let cart = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap();
        assert_eq!(services.checkout.checkout(cart.id_typed()).unwrap_err(), CartError::EmptyCart);
    }

    #[test]
    fn cancel_releases_and_closes() {
        let services = Services::in_memory(AppConfig::default());
        let pid = stocked_product(&services, 4);
        let cart = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap();
        services.carts.add_item(cart.id_typed(), pid, None, 4).unwrap();

        services.checkout.cancel(cart.id_typed()).unwrap();

        let levels = services.ledger.get_levels(StockKey::for_product(pid)).unwrap();
        assert_eq!((levels.available, levels.reserved), (4, 0));
        assert!(matches!(
            services.checkout.checkout(cart.id_typed()),
            Err(CartError::CartClosed(_))
        ));
        assert!(matches!(services.checkout.cancel(cart.id_typed()), Err(CartError::CartClosed(_))));
    }
}
