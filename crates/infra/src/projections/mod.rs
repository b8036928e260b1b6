//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event stream
//! - **Lab-isolated**: data is partitioned by lab
//! - **Idempotent**: safe for at-least-once delivery

pub mod equipment_directory;
pub mod logbook;
pub mod notifications;
pub mod slot_schedules;
pub mod stock_ledger;
pub mod stock_levels;

pub use equipment_directory::{
    EquipmentDirectoryError, EquipmentDirectoryProjection, EquipmentSummary,
};
pub use logbook::{LogbookEntry, LogbookProjection, LogbookProjectionError};
pub use notifications::{Notification, NotificationProjection, NotificationProjectionError};
pub use slot_schedules::{
    BookingSummary, SlotBookings, SlotScheduleProjection, SlotScheduleProjectionError,
};
pub use stock_ledger::{StockLedgerProjection, StockLedgerProjectionError};
pub use stock_levels::{StockLevel, StockLevelProjection, StockLevelProjectionError};
