//! Service façade over the event-sourced cores.
//!
//! Wiring (in-memory): store + bus + one worker applying published envelopes
//! to every read model. Commands are dispatched with bounded retry so a lost
//! optimistic-concurrency race is replayed against fresh state; deterministic
//! rejections (`SlotTaken`, `InsufficientStock`, lifecycle conflicts) come
//! back immediately.
//!
//! Queries are eventually consistent: a read issued right after a command may
//! not see it yet. Read models are disposable and rebuildable from the stream.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use labtrack_booking::{
    ApproveBooking, BookingId, CancelBooking, EndSession, RejectBooking, RequestBooking,
    ScheduleCommand, ScheduleId, SessionId, SlotSchedule, StartSession, TimeRange,
};
use labtrack_core::{AggregateId, LabId, UserId};
use labtrack_equipment::{
    Equipment, EquipmentCommand, EquipmentId, PlaceInMaintenance, RegisterEquipment,
    RetireEquipment, ReturnToService,
};
use labtrack_events::{EventEnvelope, InMemoryEventBus};
use labtrack_infra::{
    command_dispatcher::CommandDispatcher,
    event_store::{InMemoryEventStore, StoredEvent},
    projections::{
        equipment_directory::{EquipmentDirectoryProjection, EquipmentSummary},
        logbook::{LogbookEntry, LogbookProjection},
        notifications::{Notification, NotificationProjection},
        slot_schedules::{SlotBookings, SlotScheduleProjection},
        stock_ledger::StockLedgerProjection,
        stock_levels::{StockLevel, StockLevelProjection},
    },
    read_model::InMemoryLabStore,
    workers::{ProjectionWorker, WorkerHandle},
};
use labtrack_inventory::{
    AdjustStock, ConsumeStock, ItemKind, LedgerEntry, RegisterItem, StockCommand, StockEvent,
    StockItem, StockItemId,
};

use crate::error::AppError;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Dispatcher = CommandDispatcher<InMemoryEventStore, Bus>;

type DirectoryStore = Arc<InMemoryLabStore<EquipmentId, EquipmentSummary>>;
type SlotStore = Arc<InMemoryLabStore<ScheduleId, SlotBookings>>;
type LevelStore = Arc<InMemoryLabStore<StockItemId, StockLevel>>;
type LedgerStore = Arc<InMemoryLabStore<StockItemId, Vec<LedgerEntry>>>;
type LogbookStore = Arc<InMemoryLabStore<Uuid, LogbookEntry>>;
type NotificationStore = Arc<InMemoryLabStore<Uuid, Notification>>;

/// Result of an absolute stock adjustment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub previous: i64,
    pub new_quantity: i64,
    pub delta: i64,
}

/// Registration details for a new stock item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStockItem {
    pub kind: ItemKind,
    pub name: String,
    pub unit: String,
    pub catalog_number: Option<String>,
    pub reorder_point: Option<i64>,
    pub initial_stock: i64,
}

/// Application services over in-memory infrastructure.
pub struct AppServices {
    dispatcher: Arc<Dispatcher>,
    directory: Arc<EquipmentDirectoryProjection<DirectoryStore>>,
    slots: Arc<SlotScheduleProjection<SlotStore>>,
    levels: Arc<StockLevelProjection<LevelStore>>,
    ledger: Arc<StockLedgerProjection<LedgerStore>>,
    logbook: Arc<LogbookProjection<LogbookStore>>,
    notifications: Arc<NotificationProjection<NotificationStore>>,
    worker: WorkerHandle,
}

impl AppServices {
    /// Build services over in-memory infrastructure (dev/test wiring).
    pub fn in_memory() -> Self {
        let store = InMemoryEventStore::new();
        let bus: Bus = Arc::new(InMemoryEventBus::new());

        let directory = Arc::new(EquipmentDirectoryProjection::new(Arc::new(
            InMemoryLabStore::new(),
        )));
        let slots = Arc::new(SlotScheduleProjection::new(Arc::new(InMemoryLabStore::new())));
        let levels = Arc::new(StockLevelProjection::new(Arc::new(InMemoryLabStore::new())));
        let ledger = Arc::new(StockLedgerProjection::new(Arc::new(InMemoryLabStore::new())));
        let logbook = Arc::new(LogbookProjection::new(Arc::new(InMemoryLabStore::new())));
        let notifications = Arc::new(NotificationProjection::new(Arc::new(
            InMemoryLabStore::new(),
        )));

        // One worker drives every read model; each projection's own cursor
        // keeps re-delivery idempotent.
        let worker = {
            let directory = directory.clone();
            let slots = slots.clone();
            let levels = levels.clone();
            let ledger = ledger.clone();
            let logbook = logbook.clone();
            let notifications = notifications.clone();
            ProjectionWorker::spawn(
                "read_models",
                bus.clone(),
                None,
                move |env: EventEnvelope<JsonValue>| {
                    route_envelope(
                        &env,
                        &directory,
                        &slots,
                        &levels,
                        &ledger,
                        &logbook,
                        &notifications,
                    )
                },
            )
        };

        let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
        Self {
            dispatcher,
            directory,
            slots,
            levels,
            ledger,
            logbook,
            notifications,
            worker,
        }
    }

    /// Stop the read-model worker. Committed events stay in the store.
    pub fn shutdown(self) {
        self.worker.shutdown();
    }

    // ---- equipment ----

    pub fn register_equipment(
        &self,
        lab_id: LabId,
        name: impl Into<String>,
        category: impl Into<String>,
        model_number: Option<String>,
        serial_number: Option<String>,
    ) -> Result<EquipmentId, AppError> {
        let equipment_id = EquipmentId::new(AggregateId::new());
        let cmd = EquipmentCommand::RegisterEquipment(RegisterEquipment {
            lab_id,
            equipment_id,
            name: name.into(),
            category: category.into(),
            model_number,
            serial_number,
            occurred_at: Utc::now(),
        });
        self.dispatch_equipment(lab_id, equipment_id, cmd)?;
        info!(%lab_id, %equipment_id, "equipment registered");
        Ok(equipment_id)
    }

    pub fn place_in_maintenance(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
    ) -> Result<(), AppError> {
        let cmd = EquipmentCommand::PlaceInMaintenance(PlaceInMaintenance {
            lab_id,
            equipment_id,
            occurred_at: Utc::now(),
        });
        self.dispatch_equipment(lab_id, equipment_id, cmd)?;
        Ok(())
    }

    pub fn return_to_service(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
    ) -> Result<(), AppError> {
        let cmd = EquipmentCommand::ReturnToService(ReturnToService {
            lab_id,
            equipment_id,
            occurred_at: Utc::now(),
        });
        self.dispatch_equipment(lab_id, equipment_id, cmd)?;
        Ok(())
    }

    pub fn retire_equipment(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
    ) -> Result<(), AppError> {
        let cmd = EquipmentCommand::RetireEquipment(RetireEquipment {
            lab_id,
            equipment_id,
            occurred_at: Utc::now(),
        });
        self.dispatch_equipment(lab_id, equipment_id, cmd)?;
        Ok(())
    }

    pub fn equipment_get(
        &self,
        lab_id: LabId,
        equipment_id: &EquipmentId,
    ) -> Option<EquipmentSummary> {
        self.directory.get(lab_id, equipment_id)
    }

    pub fn equipment_list(&self, lab_id: LabId) -> Vec<EquipmentSummary> {
        self.directory.list(lab_id)
    }

    // ---- booking ----

    /// Request a reservation for an (equipment, date) slot.
    ///
    /// The unit must exist in the directory and accept reservations; the
    /// overlap decision itself is made inside the slot's aggregate, so two
    /// racing requests for the same window can never both be accepted.
    pub fn reserve_equipment(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
        date: NaiveDate,
        range: TimeRange,
        requested_by: UserId,
        purpose: Option<String>,
    ) -> Result<BookingId, AppError> {
        let unit = self
            .directory
            .get(lab_id, &equipment_id)
            .ok_or(AppError::NotFound)?;
        if !unit.is_reservable() {
            return Err(AppError::Validation(format!(
                "equipment '{}' does not accept reservations",
                unit.name
            )));
        }

        let booking_id = BookingId::new();
        let schedule_id = ScheduleId::for_slot(equipment_id, date);
        let cmd = ScheduleCommand::RequestBooking(RequestBooking {
            lab_id,
            schedule_id,
            equipment_id,
            date,
            booking_id,
            requested_by,
            range,
            purpose,
            occurred_at: Utc::now(),
        });
        self.dispatch_schedule(lab_id, schedule_id, cmd)?;
        info!(%lab_id, %booking_id, %equipment_id, %date, %range, "booking requested");
        Ok(booking_id)
    }

    pub fn approve_booking(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
        date: NaiveDate,
        booking_id: BookingId,
        approved_by: UserId,
    ) -> Result<(), AppError> {
        let schedule_id = ScheduleId::for_slot(equipment_id, date);
        let cmd = ScheduleCommand::ApproveBooking(ApproveBooking {
            lab_id,
            schedule_id,
            booking_id,
            approved_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_schedule(lab_id, schedule_id, cmd)?;
        info!(%lab_id, %booking_id, "booking approved");
        Ok(())
    }

    pub fn reject_booking(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
        date: NaiveDate,
        booking_id: BookingId,
        rejected_by: UserId,
        reason: Option<String>,
    ) -> Result<(), AppError> {
        let schedule_id = ScheduleId::for_slot(equipment_id, date);
        let cmd = ScheduleCommand::RejectBooking(RejectBooking {
            lab_id,
            schedule_id,
            booking_id,
            rejected_by,
            reason,
            occurred_at: Utc::now(),
        });
        self.dispatch_schedule(lab_id, schedule_id, cmd)?;
        info!(%lab_id, %booking_id, "booking rejected");
        Ok(())
    }

    pub fn cancel_booking(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
        date: NaiveDate,
        booking_id: BookingId,
        cancelled_by: UserId,
    ) -> Result<(), AppError> {
        let schedule_id = ScheduleId::for_slot(equipment_id, date);
        let cmd = ScheduleCommand::CancelBooking(CancelBooking {
            lab_id,
            schedule_id,
            booking_id,
            cancelled_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_schedule(lab_id, schedule_id, cmd)?;
        info!(%lab_id, %booking_id, "booking cancelled");
        Ok(())
    }

    pub fn start_session(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
        date: NaiveDate,
        booking_id: BookingId,
        started_by: UserId,
    ) -> Result<SessionId, AppError> {
        let session_id = SessionId::new();
        let schedule_id = ScheduleId::for_slot(equipment_id, date);
        let cmd = ScheduleCommand::StartSession(StartSession {
            lab_id,
            schedule_id,
            booking_id,
            session_id,
            started_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_schedule(lab_id, schedule_id, cmd)?;
        info!(%lab_id, %booking_id, %session_id, "session started");
        Ok(session_id)
    }

    /// End a running session; the backing booking completes in the same append.
    pub fn end_session(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
        date: NaiveDate,
        session_id: SessionId,
        ended_by: UserId,
        notes: Option<String>,
    ) -> Result<(), AppError> {
        let schedule_id = ScheduleId::for_slot(equipment_id, date);
        let cmd = ScheduleCommand::EndSession(EndSession {
            lab_id,
            schedule_id,
            session_id,
            ended_by,
            notes,
            occurred_at: Utc::now(),
        });
        self.dispatch_schedule(lab_id, schedule_id, cmd)?;
        info!(%lab_id, %session_id, "session ended");
        Ok(())
    }

    pub fn schedule_for_slot(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
        date: NaiveDate,
    ) -> Option<SlotBookings> {
        self.slots.for_slot(lab_id, equipment_id, date)
    }

    // ---- inventory ----

    pub fn register_item(
        &self,
        lab_id: LabId,
        item: NewStockItem,
        registered_by: UserId,
    ) -> Result<StockItemId, AppError> {
        let item_id = StockItemId::new(AggregateId::new());
        let initial_stock = item.initial_stock;
        let cmd = StockCommand::RegisterItem(RegisterItem {
            lab_id,
            item_id,
            kind: item.kind,
            name: item.name,
            unit: item.unit,
            catalog_number: item.catalog_number,
            reorder_point: item.reorder_point,
            initial_stock: item.initial_stock,
            registered_by,
            occurred_at: Utc::now(),
        });
        self.dispatch_stock(lab_id, item_id, cmd)?;
        info!(%lab_id, %item_id, initial_stock, "stock item registered");
        Ok(item_id)
    }

    /// Consume stock; returns the quantity remaining after the consumption.
    ///
    /// The remaining count is read back from the committed event, not from the
    /// (eventually consistent) stock-level read model.
    pub fn consume_stock(
        &self,
        lab_id: LabId,
        item_id: StockItemId,
        quantity: i64,
        reason: Option<String>,
        consumed_by: UserId,
    ) -> Result<i64, AppError> {
        let cmd = StockCommand::ConsumeStock(ConsumeStock {
            lab_id,
            item_id,
            quantity,
            reason,
            consumed_by,
            occurred_at: Utc::now(),
        });
        let stored = self.dispatch_stock(lab_id, item_id, cmd)?;
        let event = decode_stock_event(stored.first().map(|e| &e.payload))?;
        match event {
            StockEvent::StockConsumed(e) => {
                info!(%lab_id, %item_id, quantity, remaining = e.remaining, "stock consumed");
                Ok(e.remaining)
            }
            other => Err(AppError::Internal(format!(
                "unexpected event from consume: {other:?}"
            ))),
        }
    }

    /// Set the absolute stock count; reports old and new values and the
    /// signed difference. Adjusting to the current count is still recorded.
    pub fn adjust_stock(
        &self,
        lab_id: LabId,
        item_id: StockItemId,
        new_quantity: i64,
        reason: Option<String>,
        adjusted_by: UserId,
    ) -> Result<StockAdjustment, AppError> {
        let cmd = StockCommand::AdjustStock(AdjustStock {
            lab_id,
            item_id,
            new_quantity,
            reason,
            adjusted_by,
            occurred_at: Utc::now(),
        });
        let stored = self.dispatch_stock(lab_id, item_id, cmd)?;
        let event = decode_stock_event(stored.first().map(|e| &e.payload))?;
        match event {
            StockEvent::StockAdjusted(e) => {
                let adjustment = StockAdjustment {
                    previous: e.previous,
                    new_quantity: e.new_quantity,
                    delta: e.new_quantity - e.previous,
                };
                info!(
                    %lab_id,
                    %item_id,
                    previous = adjustment.previous,
                    new_quantity = adjustment.new_quantity,
                    "stock adjusted"
                );
                Ok(adjustment)
            }
            other => Err(AppError::Internal(format!(
                "unexpected event from adjust: {other:?}"
            ))),
        }
    }

    pub fn stock_level_get(&self, lab_id: LabId, item_id: &StockItemId) -> Option<StockLevel> {
        self.levels.get(lab_id, item_id)
    }

    pub fn stock_levels_list(&self, lab_id: LabId) -> Vec<StockLevel> {
        self.levels.list(lab_id)
    }

    pub fn stock_below_reorder(&self, lab_id: LabId) -> Vec<StockLevel> {
        self.levels.below_reorder(lab_id)
    }

    pub fn ledger_entries(&self, lab_id: LabId, item_id: &StockItemId) -> Vec<LedgerEntry> {
        self.ledger.entries(lab_id, item_id)
    }

    // ---- cross-cutting read models ----

    pub fn logbook_entries(&self, lab_id: LabId) -> Vec<LogbookEntry> {
        self.logbook.entries(lab_id)
    }

    pub fn notifications_for_user(&self, lab_id: LabId, user: UserId) -> Vec<Notification> {
        self.notifications.for_user(lab_id, user)
    }

    // ---- dispatch helpers ----

    fn dispatch_equipment(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
        cmd: EquipmentCommand,
    ) -> Result<Vec<StoredEvent>, AppError> {
        Ok(self.dispatcher.dispatch_with_retry(
            lab_id,
            equipment_id.0,
            labtrack_equipment::AGGREGATE_TYPE,
            cmd,
            |_, id| Equipment::empty(EquipmentId::new(id)),
        )?)
    }

    fn dispatch_schedule(
        &self,
        lab_id: LabId,
        schedule_id: ScheduleId,
        cmd: ScheduleCommand,
    ) -> Result<Vec<StoredEvent>, AppError> {
        Ok(self.dispatcher.dispatch_with_retry(
            lab_id,
            schedule_id.0,
            labtrack_booking::AGGREGATE_TYPE,
            cmd,
            |_, id| SlotSchedule::empty(ScheduleId::new(id)),
        )?)
    }

    fn dispatch_stock(
        &self,
        lab_id: LabId,
        item_id: StockItemId,
        cmd: StockCommand,
    ) -> Result<Vec<StoredEvent>, AppError> {
        Ok(self.dispatcher.dispatch_with_retry(
            lab_id,
            item_id.0,
            labtrack_inventory::AGGREGATE_TYPE,
            cmd,
            |_, id| StockItem::empty(StockItemId::new(id)),
        )?)
    }
}

fn decode_stock_event(payload: Option<&JsonValue>) -> Result<StockEvent, AppError> {
    let payload = payload.ok_or_else(|| {
        AppError::Internal("command committed no events".to_string())
    })?;
    serde_json::from_value(payload.clone()).map_err(|e| AppError::Internal(e.to_string()))
}

fn route_envelope(
    env: &EventEnvelope<JsonValue>,
    directory: &EquipmentDirectoryProjection<DirectoryStore>,
    slots: &SlotScheduleProjection<SlotStore>,
    levels: &StockLevelProjection<LevelStore>,
    ledger: &StockLedgerProjection<LedgerStore>,
    logbook: &LogbookProjection<LogbookStore>,
    notifications: &NotificationProjection<NotificationStore>,
) -> Result<(), String> {
    match env.aggregate_type() {
        labtrack_equipment::AGGREGATE_TYPE => {
            directory.apply_envelope(env).map_err(|e| e.to_string())?;
        }
        labtrack_booking::AGGREGATE_TYPE => {
            slots.apply_envelope(env).map_err(|e| e.to_string())?;
            notifications.apply_envelope(env).map_err(|e| e.to_string())?;
        }
        labtrack_inventory::AGGREGATE_TYPE => {
            levels.apply_envelope(env).map_err(|e| e.to_string())?;
            ledger.apply_envelope(env).map_err(|e| e.to_string())?;
        }
        _ => {}
    }
    // The logbook spans all aggregates and skips types it does not know.
    logbook.apply_envelope(env).map_err(|e| e.to_string())
}
