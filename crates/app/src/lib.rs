//! Inventory-aware shopping cart services.
//!
//! - `StockLedger`: reserve/release/commit against per-key stock counters.
//! - `CartItemManager`: cart lines that always hold a matching reservation.
//! - `CheckoutCoordinator`: checkout and cancel, settling every line.
//! - `ExpiryReclaimer`: background expiry of idle carts.
//! - `Services`: wiring over one event store and bus.

pub mod cart_manager;
pub mod catalog_admin;
pub mod checkout;
pub mod config;
pub mod error;
pub mod ledger;
pub mod reclaimer;
pub mod services;

pub use cart_manager::CartItemManager;
pub use catalog_admin::CatalogAdmin;
pub use checkout::{CheckoutCoordinator, OrderLine, OrderSummary};
pub use config::AppConfig;
pub use error::CartError;
pub use ledger::StockLedger;
pub use reclaimer::{ExpiryReclaimer, SweepReport};
pub use services::{BuildError, RebuildError, Services};
