use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use labtrack_booking::ScheduleEvent;
use labtrack_core::{AggregateId, LabId, UserId};
use labtrack_equipment::EquipmentEvent;
use labtrack_events::EventEnvelope;
use labtrack_inventory::StockEvent;

use crate::read_model::LabStore;

/// One line in a lab's logbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogbookEntry {
    /// Event id of the source event; doubles as the entry key.
    pub entry_id: Uuid,
    pub aggregate_id: AggregateId,
    pub sequence_number: u64,
    pub actor: Option<UserId>,
    pub summary: String,
    pub logged_at: DateTime<Utc>,
}

/// Lab+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    lab_id: LabId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum LogbookProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("lab isolation violation: {0}")]
    LabIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

struct LineParts {
    lab_id: LabId,
    subject: AggregateId,
    actor: Option<UserId>,
    summary: String,
    occurred_at: DateTime<Utc>,
}

/// Lab logbook projection: one human-readable line per committed event.
///
/// Feeds on all three aggregate families. Entries are keyed by the source
/// event id, so replays overwrite instead of duplicating. The logbook is
/// derived state; losing or corrupting it never affects bookings or stock,
/// and it can always be rebuilt from the streams.
#[derive(Debug)]
pub struct LogbookProjection<S>
where
    S: LabStore<Uuid, LogbookEntry>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> LogbookProjection<S>
where
    S: LabStore<Uuid, LogbookEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// All logbook entries for a lab in chronological order.
    pub fn entries(&self, lab_id: LabId) -> Vec<LogbookEntry> {
        let mut entries = self.store.list(lab_id);
        entries.sort_by_key(|e| {
            (
                e.logged_at,
                *e.aggregate_id.as_uuid().as_bytes(),
                e.sequence_number,
            )
        });
        entries
    }

    /// Apply a published envelope into the projection.
    ///
    /// Envelopes from unrecognized aggregate types are skipped.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), LogbookProjectionError> {
        let aggregate_type = envelope.aggregate_type();
        let known = aggregate_type == labtrack_equipment::AGGREGATE_TYPE
            || aggregate_type == labtrack_booking::AGGREGATE_TYPE
            || aggregate_type == labtrack_inventory::AGGREGATE_TYPE;
        if !known {
            return Ok(());
        }

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
                return Err(LogbookProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(LogbookProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let parts = if aggregate_type == labtrack_equipment::AGGREGATE_TYPE {
                let event: EquipmentEvent = serde_json::from_value(envelope.payload().clone())
                    .map_err(|e| LogbookProjectionError::Deserialize(e.to_string()))?;
                equipment_line(&event)
            } else if aggregate_type == labtrack_booking::AGGREGATE_TYPE {
                let event: ScheduleEvent = serde_json::from_value(envelope.payload().clone())
                    .map_err(|e| LogbookProjectionError::Deserialize(e.to_string()))?;
                schedule_line(&event)
            } else {
                let event: StockEvent = serde_json::from_value(envelope.payload().clone())
                    .map_err(|e| LogbookProjectionError::Deserialize(e.to_string()))?;
                stock_line(&event)
            };

            if parts.lab_id != lab_id {
                return Err(LogbookProjectionError::LabIsolation(
                    "event lab_id does not match envelope lab_id".to_string(),
                ));
            }

            if parts.subject != aggregate_id {
                return Err(LogbookProjectionError::LabIsolation(
                    "event subject does not match envelope aggregate_id".to_string(),
                ));
            }

            self.store.upsert(
                lab_id,
                envelope.event_id(),
                LogbookEntry {
                    entry_id: envelope.event_id(),
                    aggregate_id,
                    sequence_number: seq,
                    actor: parts.actor,
                    summary: parts.summary,
                    logged_at: parts.occurred_at,
                },
            );

            // Advance cursor after successful apply.
            cursors.insert(key, seq);
        }

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), LogbookProjectionError> {
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

fn equipment_line(event: &EquipmentEvent) -> LineParts {
    match event {
        EquipmentEvent::EquipmentRegistered(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.equipment_id.0,
            actor: None,
            summary: format!("equipment '{}' registered in category '{}'", e.name, e.category),
            occurred_at: e.occurred_at,
        },
        EquipmentEvent::MaintenanceStarted(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.equipment_id.0,
            actor: None,
            summary: "equipment placed in maintenance".to_string(),
            occurred_at: e.occurred_at,
        },
        EquipmentEvent::ReturnedToService(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.equipment_id.0,
            actor: None,
            summary: "equipment returned to service".to_string(),
            occurred_at: e.occurred_at,
        },
        EquipmentEvent::EquipmentRetired(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.equipment_id.0,
            actor: None,
            summary: "equipment retired".to_string(),
            occurred_at: e.occurred_at,
        },
    }
}

fn schedule_line(event: &ScheduleEvent) -> LineParts {
    match event {
        ScheduleEvent::BookingRequested(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.schedule_id.0,
            actor: Some(e.requested_by),
            summary: format!("booking {} requested for {} at {}", e.booking_id, e.date, e.range),
            occurred_at: e.occurred_at,
        },
        ScheduleEvent::BookingApproved(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.schedule_id.0,
            actor: Some(e.approved_by),
            summary: format!("booking {} approved", e.booking_id),
            occurred_at: e.occurred_at,
        },
        ScheduleEvent::BookingRejected(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.schedule_id.0,
            actor: Some(e.rejected_by),
            summary: match &e.reason {
                Some(reason) => format!("booking {} rejected: {}", e.booking_id, reason),
                None => format!("booking {} rejected", e.booking_id),
            },
            occurred_at: e.occurred_at,
        },
        ScheduleEvent::BookingCancelled(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.schedule_id.0,
            actor: Some(e.cancelled_by),
            summary: format!("booking {} cancelled", e.booking_id),
            occurred_at: e.occurred_at,
        },
        ScheduleEvent::SessionStarted(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.schedule_id.0,
            actor: Some(e.started_by),
            summary: format!("session {} started on booking {}", e.session_id, e.booking_id),
            occurred_at: e.occurred_at,
        },
        ScheduleEvent::SessionEnded(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.schedule_id.0,
            actor: Some(e.ended_by),
            summary: format!("session {} ended", e.session_id),
            occurred_at: e.occurred_at,
        },
        ScheduleEvent::BookingCompleted(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.schedule_id.0,
            actor: None,
            summary: format!("booking {} completed", e.booking_id),
            occurred_at: e.occurred_at,
        },
    }
}

fn stock_line(event: &StockEvent) -> LineParts {
    match event {
        StockEvent::ItemRegistered(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.item_id.0,
            actor: Some(e.registered_by),
            summary: format!("item '{}' registered with initial stock {}", e.name, e.initial_stock),
            occurred_at: e.occurred_at,
        },
        StockEvent::StockConsumed(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.item_id.0,
            actor: Some(e.consumed_by),
            summary: format!("consumed {} (remaining {})", e.quantity, e.remaining),
            occurred_at: e.occurred_at,
        },
        StockEvent::StockAdjusted(e) => LineParts {
            lab_id: e.lab_id,
            subject: e.item_id.0,
            actor: Some(e.adjusted_by),
            summary: format!("stock adjusted from {} to {}", e.previous, e.new_quantity),
            occurred_at: e.occurred_at,
        },
    }
}
