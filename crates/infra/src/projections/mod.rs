//! Projections (read model builders). Rebuildable from the store and idempotent under
//! at-least-once delivery.

pub mod cart_directory;

pub use cart_directory::{CartDirectory, CartDirectoryError, CartSummary};
