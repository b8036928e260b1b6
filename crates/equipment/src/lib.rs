//! Equipment registry aggregate.
//!
//! Tracks the shared instruments a lab offers for booking. Only `available`
//! equipment can be reserved; maintenance takes a unit out of rotation
//! temporarily, retirement permanently.

pub mod unit;

pub use unit::{
    AGGREGATE_TYPE, Equipment, EquipmentCommand, EquipmentEvent, EquipmentId, EquipmentRegistered,
    EquipmentRetired, EquipmentStatus, MaintenanceStarted, PlaceInMaintenance, RegisterEquipment,
    RetireEquipment, ReturnToService, ReturnedToService,
};
