//! Application services: the façade callers use to run the lab.
//!
//! This crate wires the event-sourcing infrastructure (store, bus, read-model
//! worker) and exposes one typed operation per use case. Commands go through
//! the dispatcher with bounded retry on optimistic-concurrency conflicts;
//! queries read the projections, which update asynchronously after commit.

pub mod error;
pub mod services;

pub use error::AppError;
pub use services::{AppServices, NewStockItem, StockAdjustment};
