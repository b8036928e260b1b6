//! Inventory domain: the stock ledger core (event-sourced).
//!
//! This crate contains business rules for stock items, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). The item's event
//! stream doubles as its append-only transaction history; [`ledger`] maps each
//! stock event to the ledger row the transaction-log read model records.

pub mod item;
pub mod ledger;

pub use item::{
    AGGREGATE_TYPE, AdjustStock, ConsumeStock, ItemKind, ItemRegistered, RegisterItem,
    StockAdjusted, StockCommand, StockConsumed, StockEvent, StockItem, StockItemId,
};
pub use ledger::{INITIAL_STOCK_REFERENCE, LedgerEntry, LedgerEntryKind};
