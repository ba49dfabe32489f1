//! Event primitives: the `Event` trait, stream envelopes and the pub/sub bus used to fan
//! committed stock and cart events out to read models and external collaborators.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
