//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → Projection → ReadModel
//!
//! Verifies:
//! - Reservations and stock movements update read models correctly
//! - Overlap and stock checks hold under concurrent dispatch
//! - Lab isolation is preserved end to end

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use chrono::{NaiveDate, Utc};
    use serde_json::Value as JsonValue;
    use uuid::Uuid;

    use labtrack_booking::{
        ApproveBooking, BookingId, BookingStatus, EndSession, RejectBooking, RequestBooking,
        ScheduleCommand, ScheduleId, SessionId, SlotSchedule, StartSession, TimeRange,
    };
    use labtrack_core::{AggregateId, LabId, UserId};
    use labtrack_equipment::{
        Equipment, EquipmentCommand, EquipmentId, EquipmentStatus, RegisterEquipment,
    };
    use labtrack_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use labtrack_inventory::{
        AdjustStock, ConsumeStock, ItemKind, LedgerEntry, LedgerEntryKind, RegisterItem,
        StockCommand, StockItem, StockItemId, INITIAL_STOCK_REFERENCE,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::{InMemoryEventStore, StoredEvent};
    use crate::projections::equipment_directory::{EquipmentDirectoryProjection, EquipmentSummary};
    use crate::projections::logbook::{LogbookEntry, LogbookProjection};
    use crate::projections::notifications::{Notification, NotificationProjection};
    use crate::projections::slot_schedules::{SlotBookings, SlotScheduleProjection};
    use crate::projections::stock_ledger::StockLedgerProjection;
    use crate::projections::stock_levels::{StockLevel, StockLevelProjection};
    use crate::read_model::InMemoryLabStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Dispatcher = CommandDispatcher<InMemoryEventStore, Bus>;

    struct Rig {
        dispatcher: Arc<Dispatcher>,
        directory: Arc<EquipmentDirectoryProjection<Arc<InMemoryLabStore<EquipmentId, EquipmentSummary>>>>,
        slots: Arc<SlotScheduleProjection<Arc<InMemoryLabStore<ScheduleId, SlotBookings>>>>,
        levels: Arc<StockLevelProjection<Arc<InMemoryLabStore<StockItemId, StockLevel>>>>,
        ledger: Arc<StockLedgerProjection<Arc<InMemoryLabStore<StockItemId, Vec<LedgerEntry>>>>>,
        logbook: Arc<LogbookProjection<Arc<InMemoryLabStore<Uuid, LogbookEntry>>>>,
        notifications: Arc<NotificationProjection<Arc<InMemoryLabStore<Uuid, Notification>>>>,
    }

    fn setup() -> Rig {
        let store = InMemoryEventStore::new();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(store, bus.clone()));

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

        // Subscribe to the bus BEFORE any events are published.
        let bus_clone = bus.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        {
            let directory = directory.clone();
            let slots = slots.clone();
            let levels = levels.clone();
            let ledger = ledger.clone();
            let logbook = logbook.clone();
            let notifications = notifications.clone();
            std::thread::spawn(move || {
                let sub = bus_clone.subscribe();
                let _ = ready_tx.send(());
                loop {
                    match sub.recv() {
                        Ok(env) => {
                            let t = env.aggregate_type();
                            if t == labtrack_equipment::AGGREGATE_TYPE {
                                if let Err(e) = directory.apply_envelope(&env) {
                                    eprintln!("directory projection failed: {e:?}");
                                }
                            } else if t == labtrack_booking::AGGREGATE_TYPE {
                                if let Err(e) = slots.apply_envelope(&env) {
                                    eprintln!("slot projection failed: {e:?}");
                                }
                                if let Err(e) = notifications.apply_envelope(&env) {
                                    eprintln!("notification projection failed: {e:?}");
                                }
                            } else if t == labtrack_inventory::AGGREGATE_TYPE {
                                if let Err(e) = levels.apply_envelope(&env) {
                                    eprintln!("stock level projection failed: {e:?}");
                                }
                                if let Err(e) = ledger.apply_envelope(&env) {
                                    eprintln!("ledger projection failed: {e:?}");
                                }
                            }
                            if let Err(e) = logbook.apply_envelope(&env) {
                                eprintln!("logbook projection failed: {e:?}");
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        }
        // Ensure subscriber is ready before returning (prevents missing early events).
        let _ = ready_rx.recv_timeout(std::time::Duration::from_secs(1));

        Rig {
            dispatcher,
            directory,
            slots,
            levels,
            ledger,
            logbook,
            notifications,
        }
    }

    /// Helper: wait a short time for the subscriber thread to drain the bus.
    fn wait_for_processing() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    fn test_lab_id() -> LabId {
        LabId::new()
    }

    fn test_user() -> UserId {
        UserId::new()
    }

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 12).unwrap()
    }

    fn range(start: u16, end: u16) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    fn register_equipment(rig: &Rig, lab_id: LabId, name: &str) -> EquipmentId {
        let equipment_id = EquipmentId::new(AggregateId::new());
        rig.dispatcher
            .dispatch(
                lab_id,
                equipment_id.0,
                labtrack_equipment::AGGREGATE_TYPE,
                EquipmentCommand::RegisterEquipment(RegisterEquipment {
                    lab_id,
                    equipment_id,
                    name: name.to_string(),
                    category: "sequencing".to_string(),
                    model_number: None,
                    serial_number: None,
                    occurred_at: Utc::now(),
                }),
                |_, id| Equipment::empty(EquipmentId::new(id)),
            )
            .unwrap();
        equipment_id
    }

    fn register_item(rig: &Rig, lab_id: LabId, initial_stock: i64) -> StockItemId {
        let item_id = StockItemId::new(AggregateId::new());
        rig.dispatcher
            .dispatch(
                lab_id,
                item_id.0,
                labtrack_inventory::AGGREGATE_TYPE,
                StockCommand::RegisterItem(RegisterItem {
                    lab_id,
                    item_id,
                    kind: ItemKind::Lab,
                    name: "pipette tips".to_string(),
                    unit: "box".to_string(),
                    catalog_number: None,
                    reorder_point: None,
                    initial_stock,
                    registered_by: test_user(),
                    occurred_at: Utc::now(),
                }),
                |_, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();
        item_id
    }

    fn request_cmd(
        lab_id: LabId,
        equipment_id: EquipmentId,
        booking_id: BookingId,
        requested_by: UserId,
        window: TimeRange,
    ) -> (ScheduleId, ScheduleCommand) {
        let schedule_id = ScheduleId::for_slot(equipment_id, test_date());
        let cmd = ScheduleCommand::RequestBooking(RequestBooking {
            lab_id,
            schedule_id,
            equipment_id,
            date: test_date(),
            booking_id,
            requested_by,
            range: window,
            purpose: None,
            occurred_at: Utc::now(),
        });
        (schedule_id, cmd)
    }

    fn consume_cmd(lab_id: LabId, item_id: StockItemId, quantity: i64, by: UserId) -> StockCommand {
        StockCommand::ConsumeStock(ConsumeStock {
            lab_id,
            item_id,
            quantity,
            reason: Some("prep".to_string()),
            consumed_by: by,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn reserve_flow_updates_slot_schedule_read_model() {
        let rig = setup();
        let lab_id = test_lab_id();
        let requester = test_user();
        let approver = test_user();

        let equipment_id = register_equipment(&rig, lab_id, "PCR-7");
        let booking_id = BookingId::new();
        let (schedule_id, request) =
            request_cmd(lab_id, equipment_id, booking_id, requester, range(540, 600));

        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                request,
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();
        wait_for_processing();

        let slot = rig.slots.for_slot(lab_id, equipment_id, test_date()).unwrap();
        assert_eq!(slot.bookings.len(), 1);
        assert_eq!(slot.bookings[0].booking_id, booking_id);
        assert_eq!(slot.bookings[0].status, BookingStatus::Pending);

        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                ScheduleCommand::ApproveBooking(ApproveBooking {
                    lab_id,
                    schedule_id,
                    booking_id,
                    approved_by: approver,
                    occurred_at: Utc::now(),
                }),
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();
        wait_for_processing();

        let slot = rig.slots.get(lab_id, &schedule_id).unwrap();
        assert_eq!(slot.bookings[0].status, BookingStatus::Approved);
    }

    #[test]
    fn overlapping_request_rejected_adjacent_accepted() {
        let rig = setup();
        let lab_id = test_lab_id();
        let requester = test_user();
        let equipment_id = register_equipment(&rig, lab_id, "PCR-7");

        let first = BookingId::new();
        let (schedule_id, request) =
            request_cmd(lab_id, equipment_id, first, requester, range(540, 600));
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                request,
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();

        // 09:30-10:30 overlaps the 09:00-10:00 booking.
        let (_, overlapping) =
            request_cmd(lab_id, equipment_id, BookingId::new(), requester, range(570, 630));
        let err = rig
            .dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                overlapping,
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap_err();
        match err {
            DispatchError::SlotTaken {
                conflicting_booking,
            } => assert_eq!(conflicting_booking, first.0),
            e => panic!("Expected SlotTaken, got: {e:?}"),
        }

        // 10:00-11:00 touches the boundary minute only; no overlap.
        let (_, adjacent) =
            request_cmd(lab_id, equipment_id, BookingId::new(), requester, range(600, 660));
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                adjacent,
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();
        wait_for_processing();

        let slot = rig.slots.get(lab_id, &schedule_id).unwrap();
        assert_eq!(slot.bookings.len(), 2);
    }

    #[test]
    fn concurrent_identical_reserves_exactly_one_wins() {
        let rig = setup();
        let lab_id = test_lab_id();
        let equipment_id = register_equipment(&rig, lab_id, "PCR-7");
        let schedule_id = ScheduleId::for_slot(equipment_id, test_date());

        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let dispatcher = rig.dispatcher.clone();
            let barrier = barrier.clone();
            let (_, request) =
                request_cmd(lab_id, equipment_id, BookingId::new(), test_user(), range(540, 600));
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                dispatcher.dispatch_with_retry(
                    lab_id,
                    schedule_id.0,
                    labtrack_booking::AGGREGATE_TYPE,
                    request,
                    |_, id| SlotSchedule::empty(ScheduleId::new(id)),
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let loser = results
            .into_iter()
            .find(Result::is_err)
            .unwrap()
            .unwrap_err();
        match loser {
            DispatchError::SlotTaken { .. } => {}
            e => panic!("Expected SlotTaken for the losing request, got: {e:?}"),
        }

        wait_for_processing();
        let slot = rig.slots.get(lab_id, &schedule_id).unwrap();
        assert_eq!(slot.bookings.len(), 1);
    }

    #[test]
    fn consume_beyond_available_reports_what_is_left() {
        let rig = setup();
        let lab_id = test_lab_id();
        let user = test_user();
        let item_id = register_item(&rig, lab_id, 5);

        rig.dispatcher
            .dispatch(
                lab_id,
                item_id.0,
                labtrack_inventory::AGGREGATE_TYPE,
                consume_cmd(lab_id, item_id, 3, user),
                |_, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();

        let err = rig
            .dispatcher
            .dispatch(
                lab_id,
                item_id.0,
                labtrack_inventory::AGGREGATE_TYPE,
                consume_cmd(lab_id, item_id, 3, user),
                |_, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap_err();
        match err {
            DispatchError::InsufficientStock {
                requested,
                available,
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            e => panic!("Expected InsufficientStock, got: {e:?}"),
        }

        wait_for_processing();
        let level = rig.levels.get(lab_id, &item_id).unwrap();
        assert_eq!(level.on_hand, 2);
    }

    #[test]
    fn concurrent_consumes_of_remaining_stock_exactly_one_wins() {
        let rig = setup();
        let lab_id = test_lab_id();
        let item_id = register_item(&rig, lab_id, 5);

        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let dispatcher = rig.dispatcher.clone();
            let barrier = barrier.clone();
            let cmd = consume_cmd(lab_id, item_id, 5, test_user());
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                dispatcher.dispatch_with_retry(
                    lab_id,
                    item_id.0,
                    labtrack_inventory::AGGREGATE_TYPE,
                    cmd,
                    |_, id| StockItem::empty(StockItemId::new(id)),
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let loser = results
            .into_iter()
            .find(Result::is_err)
            .unwrap()
            .unwrap_err();
        match loser {
            DispatchError::InsufficientStock {
                requested,
                available,
            } => {
                assert_eq!(requested, 5);
                assert_eq!(available, 0);
            }
            e => panic!("Expected InsufficientStock for the losing consume, got: {e:?}"),
        }

        wait_for_processing();
        let level = rig.levels.get(lab_id, &item_id).unwrap();
        assert_eq!(level.on_hand, 0);
    }

    #[test]
    fn adjusting_to_the_same_value_twice_appends_two_ledger_entries() {
        let rig = setup();
        let lab_id = test_lab_id();
        let user = test_user();
        let item_id = register_item(&rig, lab_id, 10);

        for _ in 0..2 {
            rig.dispatcher
                .dispatch(
                    lab_id,
                    item_id.0,
                    labtrack_inventory::AGGREGATE_TYPE,
                    StockCommand::AdjustStock(AdjustStock {
                        lab_id,
                        item_id,
                        new_quantity: 7,
                        reason: Some("cycle count".to_string()),
                        adjusted_by: user,
                        occurred_at: Utc::now(),
                    }),
                    |_, id| StockItem::empty(StockItemId::new(id)),
                )
                .unwrap();
        }
        wait_for_processing();

        let entries = rig.ledger.entries(lab_id, &item_id);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry_kind, LedgerEntryKind::In);
        assert_eq!(entries[0].reference.as_deref(), Some(INITIAL_STOCK_REFERENCE));
        assert_eq!(entries[1].entry_kind, LedgerEntryKind::Adjustment);
        assert_eq!(entries[1].delta, -3);
        assert_eq!(entries[2].entry_kind, LedgerEntryKind::Adjustment);
        assert_eq!(entries[2].delta, 0);

        let level = rig.levels.get(lab_id, &item_id).unwrap();
        assert_eq!(level.on_hand, 7);
    }

    #[test]
    fn ledger_deltas_sum_to_on_hand_stock() {
        let rig = setup();
        let lab_id = test_lab_id();
        let user = test_user();
        let item_id = register_item(&rig, lab_id, 10);

        rig.dispatcher
            .dispatch(
                lab_id,
                item_id.0,
                labtrack_inventory::AGGREGATE_TYPE,
                consume_cmd(lab_id, item_id, 4, user),
                |_, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();
        rig.dispatcher
            .dispatch(
                lab_id,
                item_id.0,
                labtrack_inventory::AGGREGATE_TYPE,
                StockCommand::AdjustStock(AdjustStock {
                    lab_id,
                    item_id,
                    new_quantity: 2,
                    reason: None,
                    adjusted_by: user,
                    occurred_at: Utc::now(),
                }),
                |_, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();
        rig.dispatcher
            .dispatch(
                lab_id,
                item_id.0,
                labtrack_inventory::AGGREGATE_TYPE,
                consume_cmd(lab_id, item_id, 1, user),
                |_, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();
        wait_for_processing();

        let entries = rig.ledger.entries(lab_id, &item_id);
        let total: i64 = entries.iter().map(|e| e.delta).sum();
        let level = rig.levels.get(lab_id, &item_id).unwrap();
        assert_eq!(total, level.on_hand);
        assert_eq!(level.on_hand, 1);
    }

    #[test]
    fn rejected_command_leaves_read_models_untouched() {
        let rig = setup();
        let lab_id = test_lab_id();
        let user = test_user();
        let item_id = register_item(&rig, lab_id, 5);
        wait_for_processing();

        let err = rig
            .dispatcher
            .dispatch(
                lab_id,
                item_id.0,
                labtrack_inventory::AGGREGATE_TYPE,
                consume_cmd(lab_id, item_id, 0, user),
                |_, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap_err();
        match err {
            DispatchError::Validation(_) => {}
            e => panic!("Expected Validation, got: {e:?}"),
        }

        wait_for_processing();
        let level = rig.levels.get(lab_id, &item_id).unwrap();
        assert_eq!(level.on_hand, 5);
        assert_eq!(rig.ledger.entries(lab_id, &item_id).len(), 1);
    }

    #[test]
    fn ending_a_session_completes_the_booking_in_one_append() {
        let rig = setup();
        let lab_id = test_lab_id();
        let requester = test_user();
        let equipment_id = register_equipment(&rig, lab_id, "PCR-7");

        let booking_id = BookingId::new();
        let (schedule_id, request) =
            request_cmd(lab_id, equipment_id, booking_id, requester, range(540, 600));
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                request,
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                ScheduleCommand::ApproveBooking(ApproveBooking {
                    lab_id,
                    schedule_id,
                    booking_id,
                    approved_by: test_user(),
                    occurred_at: Utc::now(),
                }),
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();

        let session_id = SessionId::new();
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                ScheduleCommand::StartSession(StartSession {
                    lab_id,
                    schedule_id,
                    booking_id,
                    session_id,
                    started_by: requester,
                    occurred_at: Utc::now(),
                }),
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();
        wait_for_processing();

        let slot = rig.slots.get(lab_id, &schedule_id).unwrap();
        assert_eq!(slot.active_session, Some(session_id));

        let committed = rig
            .dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                ScheduleCommand::EndSession(EndSession {
                    lab_id,
                    schedule_id,
                    session_id,
                    ended_by: requester,
                    notes: None,
                    occurred_at: Utc::now(),
                }),
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();

        // Session close and booking completion land in one atomic append.
        assert_eq!(committed.len(), 2);
        assert_eq!(
            committed[1].sequence_number,
            committed[0].sequence_number + 1
        );

        wait_for_processing();
        let slot = rig.slots.get(lab_id, &schedule_id).unwrap();
        assert_eq!(slot.active_session, None);
        assert_eq!(slot.bookings[0].status, BookingStatus::Completed);
    }

    #[test]
    fn approval_decisions_notify_the_requester() {
        let rig = setup();
        let lab_id = test_lab_id();
        let requester = test_user();
        let approver = test_user();
        let equipment_id = register_equipment(&rig, lab_id, "PCR-7");

        let approved_booking = BookingId::new();
        let (schedule_id, request) = request_cmd(
            lab_id,
            equipment_id,
            approved_booking,
            requester,
            range(540, 600),
        );
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                request,
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                ScheduleCommand::ApproveBooking(ApproveBooking {
                    lab_id,
                    schedule_id,
                    booking_id: approved_booking,
                    approved_by: approver,
                    occurred_at: Utc::now(),
                }),
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();

        let rejected_booking = BookingId::new();
        let (_, second_request) = request_cmd(
            lab_id,
            equipment_id,
            rejected_booking,
            requester,
            range(660, 720),
        );
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                second_request,
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                ScheduleCommand::RejectBooking(RejectBooking {
                    lab_id,
                    schedule_id,
                    booking_id: rejected_booking,
                    rejected_by: approver,
                    reason: Some("maintenance window".to_string()),
                    occurred_at: Utc::now(),
                }),
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();
        wait_for_processing();

        let inbox = rig.notifications.for_user(lab_id, requester);
        assert_eq!(inbox.len(), 2);
        assert!(inbox[0].message.contains("approved"));
        assert!(inbox[1].message.contains("rejected: maintenance window"));

        // The approver made the decisions; nothing lands in their inbox.
        assert!(rig.notifications.for_user(lab_id, approver).is_empty());
    }

    #[test]
    fn logbook_collects_lines_from_all_aggregates() {
        let rig = setup();
        let lab_id = test_lab_id();
        let requester = test_user();
        let equipment_id = register_equipment(&rig, lab_id, "NovaSeq");
        let item_id = register_item(&rig, lab_id, 5);

        let (schedule_id, request) = request_cmd(
            lab_id,
            equipment_id,
            BookingId::new(),
            requester,
            range(540, 600),
        );
        rig.dispatcher
            .dispatch(
                lab_id,
                schedule_id.0,
                labtrack_booking::AGGREGATE_TYPE,
                request,
                |_, id| SlotSchedule::empty(ScheduleId::new(id)),
            )
            .unwrap();
        rig.dispatcher
            .dispatch(
                lab_id,
                item_id.0,
                labtrack_inventory::AGGREGATE_TYPE,
                consume_cmd(lab_id, item_id, 2, requester),
                |_, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();
        wait_for_processing();

        let entries = rig.logbook.entries(lab_id);
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().any(|e| e.summary.contains("NovaSeq")));
        assert!(entries.iter().any(|e| e.summary.contains("requested")));
        assert!(entries.iter().any(|e| e.summary.contains("consumed 2 (remaining 3)")));
    }

    #[test]
    fn equipment_lifecycle_reflected_in_directory() {
        let rig = setup();
        let lab_id = test_lab_id();
        let equipment_id = register_equipment(&rig, lab_id, "PCR-7");
        wait_for_processing();

        let unit = rig.directory.get(lab_id, &equipment_id).unwrap();
        assert_eq!(unit.status, EquipmentStatus::Available);
        assert!(unit.is_reservable());

        rig.dispatcher
            .dispatch(
                lab_id,
                equipment_id.0,
                labtrack_equipment::AGGREGATE_TYPE,
                EquipmentCommand::PlaceInMaintenance(labtrack_equipment::PlaceInMaintenance {
                    lab_id,
                    equipment_id,
                    occurred_at: Utc::now(),
                }),
                |_, id| Equipment::empty(EquipmentId::new(id)),
            )
            .unwrap();
        wait_for_processing();

        let unit = rig.directory.get(lab_id, &equipment_id).unwrap();
        assert_eq!(unit.status, EquipmentStatus::Maintenance);
        assert!(!unit.is_reservable());
    }

    #[test]
    fn lab_isolation_preserved_across_read_models() {
        let rig = setup();
        let lab_a = test_lab_id();
        let lab_b = test_lab_id();

        let equipment_a = register_equipment(&rig, lab_a, "Lab A PCR");
        let item_b = register_item(&rig, lab_b, 9);
        wait_for_processing();

        assert_eq!(rig.directory.list(lab_a).len(), 1);
        assert!(rig.directory.list(lab_b).is_empty());
        assert!(rig.directory.get(lab_b, &equipment_a).is_none());

        assert_eq!(rig.levels.list(lab_b).len(), 1);
        assert!(rig.levels.list(lab_a).is_empty());
        assert!(rig.levels.get(lab_a, &item_b).is_none());

        assert_eq!(rig.logbook.entries(lab_a).len(), 1);
        assert_eq!(rig.logbook.entries(lab_b).len(), 1);
    }

    #[test]
    fn rebuilt_projection_matches_the_live_one() {
        let rig = setup();
        let lab_id = test_lab_id();
        let requester = test_user();
        let equipment_id = register_equipment(&rig, lab_id, "PCR-7");

        let mut committed: Vec<StoredEvent> = Vec::new();
        let booking_id = BookingId::new();
        let (schedule_id, request) =
            request_cmd(lab_id, equipment_id, booking_id, requester, range(540, 600));
        committed.extend(
            rig.dispatcher
                .dispatch(
                    lab_id,
                    schedule_id.0,
                    labtrack_booking::AGGREGATE_TYPE,
                    request,
                    |_, id| SlotSchedule::empty(ScheduleId::new(id)),
                )
                .unwrap(),
        );
        committed.extend(
            rig.dispatcher
                .dispatch(
                    lab_id,
                    schedule_id.0,
                    labtrack_booking::AGGREGATE_TYPE,
                    ScheduleCommand::ApproveBooking(ApproveBooking {
                        lab_id,
                        schedule_id,
                        booking_id,
                        approved_by: test_user(),
                        occurred_at: Utc::now(),
                    }),
                    |_, id| SlotSchedule::empty(ScheduleId::new(id)),
                )
                .unwrap(),
        );
        wait_for_processing();

        let fresh = SlotScheduleProjection::new(Arc::new(InMemoryLabStore::new()));
        fresh
            .rebuild_from_scratch(committed.iter().map(StoredEvent::to_envelope))
            .unwrap();

        assert_eq!(
            fresh.get(lab_id, &schedule_id),
            rig.slots.get(lab_id, &schedule_id)
        );
    }
}
