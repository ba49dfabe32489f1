//! Races between foreground cart traffic, checkout and the expiry sweep.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};

use stockcart_app::{AppConfig, CartError, Services};
use stockcart_cart::CartStatus;
use stockcart_core::OwnerId;
use stockcart_infra::RetryPolicy;

use common::{contended_services, flat_product, levels, services};

#[test]
fn checkout_and_cancel_race_has_one_winner() {
    for _ in 0..20 {
        let services = services();
        let (pid, key) = flat_product(&services, "Lamp", 800, 4);
        let cart_id = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap().id_typed();
        services.carts.add_item(cart_id, pid, None, 3).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let checkout = {
            let barrier = Arc::clone(&barrier);
            let coordinator = Arc::clone(&services.checkout);
            thread::spawn(move || {
                barrier.wait();
                coordinator.checkout(cart_id).map(|_| ())
            })
        };
        let cancel = {
            let barrier = Arc::clone(&barrier);
            let coordinator = Arc::clone(&services.checkout);
            thread::spawn(move || {
                barrier.wait();
                coordinator.cancel(cart_id)
            })
        };

        let checkout = checkout.join().unwrap();
        let cancel = cancel.join().unwrap();
        assert!(checkout.is_ok() ^ cancel.is_ok(), "exactly one must win");

        let status = services.carts.get_cart(cart_id).unwrap().status();
        if checkout.is_ok() {
            assert!(matches!(cancel, Err(CartError::CartClosed(_))));
            assert_eq!(status, CartStatus::CheckedOut);
            assert_eq!(levels(&services, key), (1, 0, 3));
        } else {
            assert!(matches!(checkout, Err(CartError::CartClosed(_))));
            assert_eq!(status, CartStatus::Canceled);
            assert_eq!(levels(&services, key), (4, 0, 0));
        }
    }
}

#[test]
fn concurrent_sweeps_release_once() {
    let services = services();
    let (pid, key) = flat_product(&services, "Vase", 2500, 6);
    let cart_id = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap().id_typed();
    services.carts.add_item(cart_id, pid, None, 4).unwrap();
    services.rebuild_read_models().unwrap();

    let later = Utc::now() + services.config.cart_ttl_chrono() + Duration::seconds(1);
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let reclaimer = Arc::clone(&services.reclaimer);
            thread::spawn(move || {
                barrier.wait();
                reclaimer.sweep_once(later)
            })
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(reports.iter().map(|r| r.expired).sum::<usize>(), 1);
    assert_eq!(reports.iter().map(|r| r.failed).sum::<usize>(), 0);

    assert_eq!(services.carts.get_cart(cart_id).unwrap().status(), CartStatus::Expired);
    assert_eq!(levels(&services, key), (6, 0, 0));
}

#[test]
fn sweep_racing_checkout_never_double_settles() {
    for _ in 0..20 {
        let services = services();
        let (pid, key) = flat_product(&services, "Rug", 9000, 2);
        let cart_id = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap().id_typed();
        services.carts.add_item(cart_id, pid, None, 2).unwrap();
        services.rebuild_read_models().unwrap();

        let later = Utc::now() + services.config.cart_ttl_chrono() + Duration::seconds(1);
        let barrier = Arc::new(Barrier::new(2));
        let sweep = {
            let barrier = Arc::clone(&barrier);
            let reclaimer = Arc::clone(&services.reclaimer);
            thread::spawn(move || {
                barrier.wait();
                reclaimer.sweep_once(later)
            })
        };
        let checkout = {
            let barrier = Arc::clone(&barrier);
            let coordinator = Arc::clone(&services.checkout);
            thread::spawn(move || {
                barrier.wait();
                coordinator.checkout(cart_id)
            })
        };

        let report = sweep.join().unwrap();
        let checkout = checkout.join().unwrap();

        match services.carts.get_cart(cart_id).unwrap().status() {
            CartStatus::CheckedOut => {
                assert!(checkout.is_ok());
                assert_eq!(report.expired, 0);
                assert_eq!(levels(&services, key), (0, 0, 2));
            }
            CartStatus::Expired => {
                assert!(matches!(checkout, Err(CartError::CartClosed(_))));
                assert_eq!(report.expired, 1);
                assert_eq!(levels(&services, key), (2, 0, 0));
            }
            other => panic!("unexpected status {other}"),
        }
    }
}

#[test]
fn one_active_cart_per_owner_under_race() {
    let services = services();
    let owner = OwnerId::new();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let carts = Arc::clone(&services.carts);
            thread::spawn(move || {
                barrier.wait();
                carts.get_or_create_active_cart(owner)
            })
        })
        .collect();

    let ids: HashSet<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap().id_typed())
        .collect();
    assert_eq!(ids.len(), 1);

    let id = ids.into_iter().next().unwrap();
    assert!(services.carts.get_cart(id).unwrap().is_active());
    assert_eq!(services.carts.get_or_create_active_cart(owner).unwrap().id_typed(), id);
}

#[test]
fn contended_reservations_conserve_stock() {
    let services = contended_services();
    let initial = 20;
    let (pid, key) = flat_product(&services, "Candle", 400, initial);

    let carts: Vec<_> = (0..6)
        .map(|_| services.carts.get_or_create_active_cart(OwnerId::new()).unwrap().id_typed())
        .collect();

    let barrier = Arc::new(Barrier::new(carts.len()));
    let handles: Vec<_> = carts
        .iter()
        .copied()
        .map(|cart_id| {
            let barrier = Arc::clone(&barrier);
            let manager = Arc::clone(&services.carts);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..5 {
                    match manager.add_item(cart_id, pid, None, 1) {
                        Ok(_) | Err(CartError::InsufficientStock { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let in_carts: i64 = carts
        .iter()
        .map(|c| services.carts.get_cart(*c).unwrap().items().iter().map(|i| i.quantity).sum::<i64>())
        .sum();
    let (available, reserved, committed) = levels(&services, key);

    assert_eq!(reserved, in_carts);
    assert_eq!(in_carts, initial);
    assert_eq!(available, 0);
    assert_eq!(available + reserved + committed, initial);

    for c in &carts {
        services.checkout.cancel(*c).unwrap();
    }
    assert_eq!(levels(&services, key), (initial, 0, 0));
}

#[test]
fn removals_release_stock_while_restocks_hammer_the_key() {
    stockcart_observability::init_for_tests();
    let services = Services::in_memory(AppConfig {
        settle: RetryPolicy::without_backoff(1),
        ..AppConfig::default()
    });
    let initial = 50;
    let (pid, key) = flat_product(&services, "Rope", 250, initial);
    let cart_id = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap().id_typed();

    let stop = Arc::new(AtomicBool::new(false));
    let restocked = Arc::new(AtomicI64::new(0));
    let hammers: Vec<_> = (0..3)
        .map(|_| {
            let stop = Arc::clone(&stop);
            let restocked = Arc::clone(&restocked);
            let ledger = Arc::clone(&services.ledger);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if ledger.restock(key, 1).is_ok() {
                        restocked.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for _ in 0..300 {
        let item = match services.carts.add_item(cart_id, pid, None, 1) {
            Ok(item) => item,
            Err(CartError::ConcurrentModification) => continue,
            Err(e) => panic!("unexpected error: {e}"),
        };
        services.carts.remove_item(cart_id, item.item_id).unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    for h in hammers {
        h.join().unwrap();
    }

    let in_cart: i64 = services.carts.get_cart(cart_id).unwrap().items().iter().map(|i| i.quantity).sum();
    let (available, reserved, committed) = levels(&services, key);
    assert_eq!(in_cart, 0);
    assert_eq!(reserved, in_cart);
    assert_eq!(available + reserved + committed, initial + restocked.load(Ordering::Relaxed));
}

#[test]
fn racing_updates_to_the_same_quantity_reserve_once() {
    for _ in 0..20 {
        let services = services();
        let (pid, key) = flat_product(&services, "Bowl", 600, 10);
        let cart_id = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap().id_typed();
        let item = services.carts.add_item(cart_id, pid, None, 1).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let carts = Arc::clone(&services.carts);
                thread::spawn(move || {
                    barrier.wait();
                    carts.update_quantity(cart_id, item.item_id, 2)
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().unwrap().quantity, 2);
        }

        assert_eq!(services.carts.get_cart(cart_id).unwrap().item(item.item_id).unwrap().quantity, 2);
        assert_eq!(levels(&services, key), (8, 2, 0));
    }
}

#[test]
fn racing_shrink_and_grow_leave_ledger_matching_the_line() {
    for _ in 0..20 {
        let services = services();
        let initial = 10;
        let (pid, key) = flat_product(&services, "Plate", 900, initial);
        let cart_id = services.carts.get_or_create_active_cart(OwnerId::new()).unwrap().id_typed();
        let item = services.carts.add_item(cart_id, pid, None, 3).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [1, 5]
            .into_iter()
            .map(|target| {
                let barrier = Arc::clone(&barrier);
                let carts = Arc::clone(&services.carts);
                thread::spawn(move || {
                    barrier.wait();
                    carts.update_quantity(cart_id, item.item_id, target)
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let quantity = services.carts.get_cart(cart_id).unwrap().item(item.item_id).unwrap().quantity;
        assert!(quantity == 1 || quantity == 5, "final quantity {quantity}");
        assert_eq!(levels(&services, key), (initial - quantity, quantity, 0));
    }
}
