mod common;

use proptest::prelude::*;

use stockcart_app::CartError;
use stockcart_core::OwnerId;

use common::{flat_product, levels, services};

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn merged_adds_reserve_their_sum(a in 1i64..10, b in 1i64..10) {
        let services = services();
        let (pid, key) = flat_product(&services, "Bowl", 650, 25);
        let cart_id = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap().id_typed();

        services.carts.add_item(cart_id, pid, None, a).unwrap();
        services.carts.add_item(cart_id, pid, None, b).unwrap();

        let cart = services.carts.get_cart(cart_id).unwrap();
        prop_assert_eq!(cart.items().len(), 1);
        prop_assert_eq!(cart.items()[0].quantity, a + b);
        prop_assert_eq!(levels(&services, key), (25 - a - b, a + b, 0));
    }

    #[test]
    fn ledger_matches_cart_lines_after_any_edit_sequence(
        stock in 1i64..15,
        edits in proptest::collection::vec((0u8..4, 1i64..6), 1..20),
    ) {
        let services = services();
        let (pid, key) = flat_product(&services, "Spoon", 120, stock);
        let cart_id = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap().id_typed();
        let mut closed = false;

        for (op, qty) in edits {
            let line = services.carts.get_cart(cart_id).unwrap().items().first().cloned();
            let res = match (op, line) {
                (0, _) | (1, None) | (2, None) => services.carts.add_item(cart_id, pid, None, qty).map(|_| ()),
                (1, Some(l)) => services.carts.update_quantity(cart_id, l.item_id, qty).map(|_| ()),
                (2, Some(l)) => services.carts.remove_item(cart_id, l.item_id),
                _ => {
                    let r = services.checkout.cancel(cart_id);
                    closed = true;
                    r
                }
            };
            match res {
                Ok(()) | Err(CartError::InsufficientStock { .. }) | Err(CartError::CartClosed(_)) => {}
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }

            let cart = services.carts.get_cart(cart_id).unwrap();
            let held: i64 = if cart.is_active() { cart.items().iter().map(|i| i.quantity).sum() } else { 0 };
            let (available, reserved, committed) = levels(&services, key);
            prop_assert!(available >= 0 && reserved >= 0);
            prop_assert_eq!(reserved, held);
            prop_assert_eq!(available + reserved + committed, stock);
            if closed {
                prop_assert!(!cart.is_active());
            }
        }
    }
}
