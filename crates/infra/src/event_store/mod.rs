//! Append-only event store boundary.
//!
//! This module defines an infrastructure-facing abstraction for storing and
//! loading lab-scoped event streams without making any storage assumptions,
//! plus the two shipped backends: an in-memory store for tests and
//! single-process deployments, and a Postgres store for durable ones.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
pub use labtrack_core::ExpectedVersion;
