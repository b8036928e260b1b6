//! Lab-isolated read model storage abstractions.

pub mod lab_store;

pub use lab_store::{InMemoryLabStore, LabStore};
