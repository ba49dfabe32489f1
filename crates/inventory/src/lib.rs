//! Stock ledger domain (event-sourced).
//!
//! One `StockItem` stream per stock key holds the `available`/`reserved`/`committed`
//! counters. Pure decision logic only; the application layer supplies storage and retries.

pub mod stock;

pub use stock::{
    CommitStock, RegisterStock, ReleaseStock, ReserveStock, RestockItem, StockCommand,
    StockCommitted, StockEvent, StockItem, StockKey, StockLevels, StockReceived, StockRegistered,
    StockReleased, StockReserved, AGGREGATE_TYPE,
};
