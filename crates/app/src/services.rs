//! Wiring: one event store, one bus, the read models and the services built on them.

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use stockcart_cart::{CartId, AGGREGATE_TYPE as CART_AGGREGATE_TYPE};
use stockcart_catalog::{CatalogProjectionError, InMemoryCatalog, AGGREGATE_TYPE as PRODUCT_AGGREGATE_TYPE};
use stockcart_events::{EventEnvelope, InMemoryEventBus};
use stockcart_infra::event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
use stockcart_infra::projections::{CartDirectory, CartDirectoryError, CartSummary};
use stockcart_infra::read_model::InMemoryReadModelStore;
use stockcart_infra::workers::{ProjectionWorker, WorkerHandle};
use stockcart_infra::CommandDispatcher;

use crate::cart_manager::CartItemManager;
use crate::catalog_admin::CatalogAdmin;
use crate::checkout::CheckoutCoordinator;
use crate::config::AppConfig;
use crate::ledger::StockLedger;
use crate::reclaimer::ExpiryReclaimer;

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<SharedStore, SharedBus>;
pub type Directory = CartDirectory<InMemoryReadModelStore<CartId, CartSummary>>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,

    #[error("failed to connect to Postgres: {0}")]
    Connect(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogProjectionError),

    #[error(transparent)]
    Directory(#[from] CartDirectoryError),
}

pub struct Services {
    pub config: AppConfig,
    pub store: SharedStore,
    pub bus: SharedBus,
    pub dispatcher: Arc<Dispatcher>,
    pub catalog: Arc<InMemoryCatalog>,
    pub directory: Arc<Directory>,
    pub ledger: Arc<StockLedger>,
    pub products: Arc<CatalogAdmin>,
    pub carts: Arc<CartItemManager>,
    pub checkout: Arc<CheckoutCoordinator>,
    pub reclaimer: Arc<ExpiryReclaimer>,
}

impl Services {
    /// In-memory store and bus (dev/test).
    pub fn in_memory(config: AppConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryEventStore::new()))
    }

    /// Postgres-backed store. The runtime must outlive the returned services and every call
    /// into them must come from a thread outside that runtime.
    pub fn persistent(config: AppConfig, runtime: &Runtime) -> Result<Self, BuildError> {
        let url = config.database_url.clone().ok_or(BuildError::MissingDatabaseUrl)?;

        let pool = runtime.block_on(PgPool::connect(&url))?;
        let store = PostgresEventStore::new(pool, runtime.handle().clone());
        runtime.block_on(store.ensure_schema())?;
        info!("postgres event store ready");

        Ok(Self::with_store(config, Arc::new(store)))
    }

    pub fn with_store(config: AppConfig, store: SharedStore) -> Self {
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&store), Arc::clone(&bus)));

        let catalog = Arc::new(InMemoryCatalog::new());
        let directory = Arc::new(CartDirectory::new(InMemoryReadModelStore::new()));

        let ledger = Arc::new(StockLedger::new(
            Arc::clone(&dispatcher),
            config.retry,
            config.settle,
        ));
        let products = Arc::new(CatalogAdmin::new(Arc::clone(&dispatcher), Arc::clone(&catalog)));
        let carts = Arc::new(CartItemManager::new(
            Arc::clone(&dispatcher),
            Arc::clone(&ledger),
            catalog.clone(),
            config.retry,
        ));
        let checkout = Arc::new(CheckoutCoordinator::new(
            Arc::clone(&dispatcher),
            Arc::clone(&ledger),
            config.retry,
        ));
        let reclaimer = Arc::new(ExpiryReclaimer::new(
            Arc::clone(&dispatcher),
            Arc::clone(&ledger),
            Arc::clone(&directory),
            config.cart_ttl_chrono(),
        ));

        Self {
            config,
            store,
            bus,
            dispatcher,
            catalog,
            directory,
            ledger,
            products,
            carts,
            checkout,
            reclaimer,
        }
    }

    /// Replay the catalog and the cart directory from the store.
    pub fn rebuild_read_models(&self) -> Result<(), RebuildError> {
        let products = self.store.load_by_type(PRODUCT_AGGREGATE_TYPE)?;
        self.catalog
            .rebuild_from_scratch(products.iter().map(|e| e.to_envelope()))?;

        let carts = self.store.load_by_type(CART_AGGREGATE_TYPE)?;
        self.directory
            .rebuild_from_scratch(carts.iter().map(|e| e.to_envelope()))?;

        info!(products = products.len(), cart_events = carts.len(), "read models rebuilt");
        Ok(())
    }

    /// Keep the catalog and the cart directory up to date from the bus.
    pub fn start_projection_worker(&self) -> io::Result<WorkerHandle> {
        let catalog = Arc::clone(&self.catalog);
        let directory = Arc::clone(&self.directory);

        ProjectionWorker::spawn("read-models", &self.bus, move |env: EventEnvelope<JsonValue>| {
            if let Err(err) = catalog.apply_envelope(&env) {
                warn!(error = %err, "catalog projection rejected envelope");
            }
            directory.apply_envelope(&env)
        })
    }

    /// Start the expiry sweep on the configured interval.
    pub fn start_reclaimer(&self) -> io::Result<WorkerHandle> {
        self.reclaimer.spawn(self.config.sweep_interval)
    }
}

impl core::fmt::Debug for Services {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Services").field("config", &self.config).finish_non_exhaustive()
    }
}
