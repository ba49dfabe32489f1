use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockcart_catalog::{ProductId, VariantId};
use stockcart_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ValueObject};
use stockcart_events::Event;

/// Stream type for stock counters.
pub const AGGREGATE_TYPE: &str = "inventory.stock";

/// Key of one set of stock counters.
///
/// A variant's own id for products with variants; the product id for flat-stock products.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockKey(pub AggregateId);

impl StockKey {
    pub fn for_variant(variant_id: VariantId) -> Self {
        Self(variant_id.0)
    }

    pub fn for_product(product_id: ProductId) -> Self {
        Self(product_id.0)
    }

    /// Key backing a cart line.
    pub fn for_line(product_id: ProductId, variant_id: Option<VariantId>) -> Self {
        match variant_id {
            Some(v) => Self::for_variant(v),
            None => Self::for_product(product_id),
        }
    }
}

impl From<VariantId> for StockKey {
    fn from(value: VariantId) -> Self {
        Self::for_variant(value)
    }
}

impl From<ProductId> for StockKey {
    fn from(value: ProductId) -> Self {
        Self::for_product(value)
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Read-only snapshot of one key's counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    /// Unreserved units.
    pub available: i64,
    /// Units held by open carts.
    pub reserved: i64,
    /// Units sold (reservations converted at checkout).
    pub committed: i64,
}

impl StockLevels {
    /// Units not yet sold: `available + reserved`. Only ever decreases through `commit`.
    pub fn total_remaining(&self) -> i64 {
        self.available + self.reserved
    }
}

impl ValueObject for StockLevels {}

/// Aggregate root: StockItem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    key: StockKey,
    available: i64,
    reserved: i64,
    committed: i64,
    /// Everything ever put on the shelf (initial stock plus restocks).
    received: i64,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            available: 0,
            reserved: 0,
            committed: 0,
            received: 0,
            version: 0,
            created: false,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    pub fn available(&self) -> i64 {
        self.available
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    pub fn committed(&self) -> i64 {
        self.committed
    }

    pub fn received(&self) -> i64 {
        self.received
    }

    pub fn levels(&self) -> StockLevels {
        StockLevels {
            available: self.available,
            reserved: self.reserved,
            committed: self.committed,
        }
    }
}

impl AggregateRoot for StockItem {
    type Id = StockKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterStock (create the counters with an opening balance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterStock {
    pub key: StockKey,
    pub initial: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RestockItem (goods received).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockItem {
    pub key: StockKey,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub key: StockKey,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub key: StockKey,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CommitStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStock {
    pub key: StockKey,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    Register(RegisterStock),
    Restock(RestockItem),
    Reserve(ReserveStock),
    Release(ReleaseStock),
    Commit(CommitStock),
}

/// Event: StockRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRegistered {
    pub key: StockKey,
    pub initial: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub key: StockKey,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved (`available -= q; reserved += q`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub key: StockKey,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased (`reserved -= q; available += q`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub key: StockKey,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockCommitted (`reserved -= q; committed += q`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCommitted {
    pub key: StockKey,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    StockRegistered(StockRegistered),
    StockReceived(StockReceived),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    StockCommitted(StockCommitted),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockRegistered(_) => "inventory.stock.registered",
            StockEvent::StockReceived(_) => "inventory.stock.received",
            StockEvent::StockReserved(_) => "inventory.stock.reserved",
            StockEvent::StockReleased(_) => "inventory.stock.released",
            StockEvent::StockCommitted(_) => "inventory.stock.committed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::StockRegistered(e) => e.occurred_at,
            StockEvent::StockReceived(e) => e.occurred_at,
            StockEvent::StockReserved(e) => e.occurred_at,
            StockEvent::StockReleased(e) => e.occurred_at,
            StockEvent::StockCommitted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::StockRegistered(e) => {
                self.key = e.key;
                self.available = e.initial;
                self.reserved = 0;
                self.committed = 0;
                self.received = e.initial;
                self.created = true;
            }
            StockEvent::StockReceived(e) => {
                self.available += e.quantity;
                self.received += e.quantity;
            }
            StockEvent::StockReserved(e) => {
                self.available -= e.quantity;
                self.reserved += e.quantity;
            }
            StockEvent::StockReleased(e) => {
                self.reserved -= e.quantity;
                self.available += e.quantity;
            }
            StockEvent::StockCommitted(e) => {
                self.reserved -= e.quantity;
                self.committed += e.quantity;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::Register(cmd) => self.handle_register(cmd),
            StockCommand::Restock(cmd) => self.handle_restock(cmd),
            StockCommand::Reserve(cmd) => self.handle_reserve(cmd),
            StockCommand::Release(cmd) => self.handle_release(cmd),
            StockCommand::Commit(cmd) => self.handle_commit(cmd),
        }
    }
}

impl StockItem {
    fn ensure_registered(&self, key: StockKey) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.key != key {
            return Err(DomainError::invariant("stock key mismatch"));
        }
        Ok(())
    }

    fn ensure_positive(quantity: i64) -> Result<(), DomainError> {
        if quantity <= 0 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        Ok(())
    }

    fn ensure_reserved(&self, quantity: i64) -> Result<(), DomainError> {
        if quantity > self.reserved {
            return Err(DomainError::ReservationUnderflow {
                requested: quantity,
                reserved: self.reserved,
            });
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterStock) -> Result<Vec<StockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock already registered"));
        }
        if cmd.initial < 0 {
            return Err(DomainError::InvalidQuantity(cmd.initial));
        }

        Ok(vec![StockEvent::StockRegistered(StockRegistered {
            key: cmd.key,
            initial: cmd.initial,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restock(&self, cmd: &RestockItem) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered(cmd.key)?;
        Self::ensure_positive(cmd.quantity)?;

        // Every counter is bounded by `received`, so this one check keeps all of them in range.
        if self.received.checked_add(cmd.quantity).is_none() {
            return Err(DomainError::validation("restock would overflow the stock counters"));
        }

        Ok(vec![StockEvent::StockReceived(StockReceived {
            key: cmd.key,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered(cmd.key)?;
        Self::ensure_positive(cmd.quantity)?;

        if self.available < cmd.quantity {
            return Err(DomainError::InsufficientStock {
                requested: cmd.quantity,
                available: self.available,
            });
        }

        Ok(vec![StockEvent::StockReserved(StockReserved {
            key: cmd.key,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered(cmd.key)?;
        Self::ensure_positive(cmd.quantity)?;
        self.ensure_reserved(cmd.quantity)?;

        Ok(vec![StockEvent::StockReleased(StockReleased {
            key: cmd.key,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_commit(&self, cmd: &CommitStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered(cmd.key)?;
        Self::ensure_positive(cmd.quantity)?;
        self.ensure_reserved(cmd.quantity)?;

        Ok(vec![StockEvent::StockCommitted(StockCommitted {
            key: cmd.key,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}
