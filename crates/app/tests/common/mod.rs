#![allow(dead_code)]

use stockcart_app::{AppConfig, Services};
use stockcart_catalog::{ProductId, VariantId};
use stockcart_infra::RetryPolicy;
use stockcart_inventory::{StockKey, StockLevels};

pub fn services() -> Services {
    stockcart_observability::init_for_tests();
    Services::in_memory(AppConfig::default())
}

/// More generous budgets for tests that pile many threads onto one key.
pub fn contended_services() -> Services {
    stockcart_observability::init_for_tests();
    let config = AppConfig {
        retry: RetryPolicy::default().with_max_attempts(64),
        settle: RetryPolicy::default().with_max_attempts(256),
        ..AppConfig::default()
    };
    Services::in_memory(config)
}

/// An active flat product with `stock` units registered.
pub fn flat_product(services: &Services, name: &str, price: u64, stock: i64) -> (ProductId, StockKey) {
    let pid = services.products.create_product(&format!("SKU-{name}"), name, price).unwrap();
    services.products.activate(pid).unwrap();
    let key = StockKey::for_product(pid);
    services.ledger.register(key, stock).unwrap();
    (pid, key)
}

/// An active product with one variant labelled `label` holding `stock` units.
pub fn variant_product(
    services: &Services,
    name: &str,
    label: &str,
    price: u64,
    stock: i64,
) -> (ProductId, VariantId, StockKey) {
    let pid = services.products.create_product(&format!("SKU-{name}"), name, price).unwrap();
    let vid = services.products.add_variant(pid, label, None).unwrap();
    services.products.activate(pid).unwrap();
    let key = StockKey::for_variant(vid);
    services.ledger.register(key, stock).unwrap();
    (pid, vid, key)
}

pub fn levels(services: &Services, key: StockKey) -> (i64, i64, i64) {
    let StockLevels {
        available,
        reserved,
        committed,
    } = services.ledger.get_levels(key).unwrap();
    (available, reserved, committed)
}
