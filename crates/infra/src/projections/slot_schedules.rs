use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use thiserror::Error;

use labtrack_booking::{
    BookingId, BookingStatus, ScheduleEvent, ScheduleId, SessionId, TimeRange,
};
use labtrack_core::{AggregateId, LabId, UserId};
use labtrack_equipment::EquipmentId;
use labtrack_events::EventEnvelope;

use crate::read_model::LabStore;

/// One booking row inside a slot's schedule view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSummary {
    pub booking_id: BookingId,
    pub requested_by: UserId,
    pub range: TimeRange,
    pub purpose: Option<String>,
    pub status: BookingStatus,
}

/// Read model: the day's schedule for one piece of equipment.
///
/// Mirrors the slot schedule aggregate's booking list, including terminal
/// bookings, so the view doubles as the slot's history for the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBookings {
    pub schedule_id: ScheduleId,
    pub equipment_id: EquipmentId,
    pub date: NaiveDate,
    pub bookings: Vec<BookingSummary>,
    /// Session currently running on this slot, if any.
    pub active_session: Option<SessionId>,
}

impl SlotBookings {
    /// Bookings still holding their window (pending or approved).
    pub fn active_bookings(&self) -> impl Iterator<Item = &BookingSummary> {
        self.bookings.iter().filter(|b| b.status.blocks_slot())
    }
}

/// Lab+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    lab_id: LabId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum SlotScheduleProjectionError {
    #[error("failed to deserialize schedule event: {0}")]
    Deserialize(String),

    #[error("lab isolation violation: {0}")]
    LabIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Slot schedule projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a lab-isolated
/// read model of every (equipment, date) slot: its bookings, their statuses
/// and the currently running usage session. Read models are disposable and
/// rebuildable from the event stream.
#[derive(Debug)]
pub struct SlotScheduleProjection<S>
where
    S: LabStore<ScheduleId, SlotBookings>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> SlotScheduleProjection<S>
where
    S: LabStore<ScheduleId, SlotBookings>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query one slot's schedule.
    pub fn get(&self, lab_id: LabId, schedule_id: &ScheduleId) -> Option<SlotBookings> {
        self.store.get(lab_id, schedule_id)
    }

    /// Query the schedule for an (equipment, date) slot.
    pub fn for_slot(
        &self,
        lab_id: LabId,
        equipment_id: EquipmentId,
        date: NaiveDate,
    ) -> Option<SlotBookings> {
        self.get(lab_id, &ScheduleId::for_slot(equipment_id, date))
    }

    /// List all slots with bookings for a lab.
    pub fn list(&self, lab_id: LabId) -> Vec<SlotBookings> {
        self.store.list(lab_id)
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces lab isolation
    /// - Enforces monotonic sequence per (lab, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), SlotScheduleProjectionError> {
        let lab_id = envelope.lab_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        // Cursor check (per lab + aggregate stream).
        if let Ok(mut cursors) = self.cursors.write() {
            let key = CursorKey {
                lab_id,
                aggregate_id,
            };
            let last = *cursors.get(&key).unwrap_or(&0);

            if seq == 0 {
                return Err(SlotScheduleProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(SlotScheduleProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let event: ScheduleEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| SlotScheduleProjectionError::Deserialize(e.to_string()))?;

            // Validate lab isolation at the event level.
            let (event_lab, schedule_id) = match &event {
                ScheduleEvent::BookingRequested(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::BookingApproved(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::BookingRejected(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::BookingCancelled(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::SessionStarted(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::SessionEnded(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::BookingCompleted(e) => (e.lab_id, e.schedule_id),
            };

            if event_lab != lab_id {
                return Err(SlotScheduleProjectionError::LabIsolation(
                    "event lab_id does not match envelope lab_id".to_string(),
                ));
            }

            if schedule_id.0 != aggregate_id {
                return Err(SlotScheduleProjectionError::LabIsolation(
                    "event schedule_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match event {
                ScheduleEvent::BookingRequested(e) => {
                    let mut slot = self.store.get(lab_id, &e.schedule_id).unwrap_or(SlotBookings {
                        schedule_id: e.schedule_id,
                        equipment_id: e.equipment_id,
                        date: e.date,
                        bookings: Vec::new(),
                        active_session: None,
                    });
                    slot.bookings.push(BookingSummary {
                        booking_id: e.booking_id,
                        requested_by: e.requested_by,
                        range: e.range,
                        purpose: e.purpose,
                        status: BookingStatus::Pending,
                    });
                    self.store.upsert(lab_id, e.schedule_id, slot);
                }
                ScheduleEvent::BookingApproved(e) => {
                    self.set_status(lab_id, e.schedule_id, e.booking_id, BookingStatus::Approved);
                }
                ScheduleEvent::BookingRejected(e) => {
                    self.set_status(lab_id, e.schedule_id, e.booking_id, BookingStatus::Rejected);
                }
                ScheduleEvent::BookingCancelled(e) => {
                    self.set_status(lab_id, e.schedule_id, e.booking_id, BookingStatus::Cancelled);
                }
                ScheduleEvent::SessionStarted(e) => {
                    if let Some(mut slot) = self.store.get(lab_id, &e.schedule_id) {
                        slot.active_session = Some(e.session_id);
                        self.store.upsert(lab_id, e.schedule_id, slot);
                    }
                }
                ScheduleEvent::SessionEnded(e) => {
                    if let Some(mut slot) = self.store.get(lab_id, &e.schedule_id) {
                        if slot.active_session == Some(e.session_id) {
                            slot.active_session = None;
                        }
                        self.store.upsert(lab_id, e.schedule_id, slot);
                    }
                }
                ScheduleEvent::BookingCompleted(e) => {
                    self.set_status(lab_id, e.schedule_id, e.booking_id, BookingStatus::Completed);
                }
            }

            // Advance cursor after successful apply.
            cursors.insert(key, seq);
        }

        Ok(())
    }

    fn set_status(
        &self,
        lab_id: LabId,
        schedule_id: ScheduleId,
        booking_id: BookingId,
        status: BookingStatus,
    ) {
        if let Some(mut slot) = self.store.get(lab_id, &schedule_id) {
            if let Some(booking) = slot
                .bookings
                .iter_mut()
                .find(|b| b.booking_id == booking_id)
            {
                booking.status = status;
            }
            self.store.upsert(lab_id, schedule_id, slot);
        }
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), SlotScheduleProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        // Clear read model per lab before rebuilding.
        {
            let mut labs = envs.iter().map(|e| e.lab_id()).collect::<Vec<_>>();
            labs.sort_by_key(|t| *t.as_uuid().as_bytes());
            labs.dedup();
            for lab in labs {
                self.store.clear_lab(lab);
            }
        }

        // Deterministic replay order: lab, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.lab_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
