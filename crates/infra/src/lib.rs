//! Infrastructure layer: event storage, command dispatch, read models, workers.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{
    EventStore, EventStoreError, ExpectedVersion, InMemoryEventStore, PostgresEventStore,
    StoredEvent, UncommittedEvent,
};
pub use read_model::{InMemoryLabStore, LabStore};
pub use workers::{ProjectionWorker, WorkerHandle};
