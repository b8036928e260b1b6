//! Event plumbing shared by the booking and inventory cores.
//!
//! Contains the `Event` trait, the stream envelope, the pub/sub bus
//! abstraction with an in-memory implementation, and the lab-scoping helper
//! used by subscriber loops.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod lab;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use lab::LabScoped;
