//! `stockcart-core`: domain building blocks shared by the stock ledger, the cart and the
//! catalog.
//!
//! Nothing in here performs IO; infrastructure lives in `stockcart-infra`.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, OwnerId};
pub use value_object::ValueObject;
