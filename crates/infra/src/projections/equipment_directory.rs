use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use labtrack_core::{AggregateId, LabId};
use labtrack_equipment::{EquipmentEvent, EquipmentId, EquipmentStatus};
use labtrack_events::EventEnvelope;

use crate::read_model::LabStore;

/// Queryable equipment directory: one row per registered unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquipmentSummary {
    pub equipment_id: EquipmentId,
    pub name: String,
    pub category: String,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub status: EquipmentStatus,
}

impl EquipmentSummary {
    /// Only available units accept new reservations.
    pub fn is_reservable(&self) -> bool {
        matches!(self.status, EquipmentStatus::Available)
    }
}

/// Lab+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    lab_id: LabId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum EquipmentDirectoryError {
    #[error("failed to deserialize equipment event: {0}")]
    Deserialize(String),

    #[error("lab isolation violation: {0}")]
    LabIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Equipment directory projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a lab-isolated
/// read model of every registered unit and its current availability. This is
/// the list the reservation flow consults before dispatching a booking
/// request. Read models are disposable and rebuildable from the event stream.
#[derive(Debug)]
pub struct EquipmentDirectoryProjection<S>
where
    S: LabStore<EquipmentId, EquipmentSummary>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> EquipmentDirectoryProjection<S>
where
    S: LabStore<EquipmentId, EquipmentSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query the directory for one lab/unit.
    pub fn get(&self, lab_id: LabId, equipment_id: &EquipmentId) -> Option<EquipmentSummary> {
        self.store.get(lab_id, equipment_id)
    }

    /// List all units for a lab.
    pub fn list(&self, lab_id: LabId) -> Vec<EquipmentSummary> {
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
    ) -> Result<(), EquipmentDirectoryError> {
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
                return Err(EquipmentDirectoryError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(EquipmentDirectoryError::NonMonotonicSequence { last, found: seq });
            }

            let event: EquipmentEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| EquipmentDirectoryError::Deserialize(e.to_string()))?;

            // Validate lab isolation at the event level.
            let (event_lab, equipment_id) = match &event {
                EquipmentEvent::EquipmentRegistered(e) => (e.lab_id, e.equipment_id),
                EquipmentEvent::MaintenanceStarted(e) => (e.lab_id, e.equipment_id),
                EquipmentEvent::ReturnedToService(e) => (e.lab_id, e.equipment_id),
                EquipmentEvent::EquipmentRetired(e) => (e.lab_id, e.equipment_id),
            };

            if event_lab != lab_id {
                return Err(EquipmentDirectoryError::LabIsolation(
                    "event lab_id does not match envelope lab_id".to_string(),
                ));
            }

            if equipment_id.0 != aggregate_id {
                return Err(EquipmentDirectoryError::LabIsolation(
                    "event equipment_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match event {
                EquipmentEvent::EquipmentRegistered(e) => {
                    self.store.upsert(
                        lab_id,
                        e.equipment_id,
                        EquipmentSummary {
                            equipment_id: e.equipment_id,
                            name: e.name,
                            category: e.category,
                            model_number: e.model_number,
                            serial_number: e.serial_number,
                            status: EquipmentStatus::Available,
                        },
                    );
                }
                EquipmentEvent::MaintenanceStarted(e) => {
                    self.set_status(lab_id, e.equipment_id, EquipmentStatus::Maintenance);
                }
                EquipmentEvent::ReturnedToService(e) => {
                    self.set_status(lab_id, e.equipment_id, EquipmentStatus::Available);
                }
                EquipmentEvent::EquipmentRetired(e) => {
                    self.set_status(lab_id, e.equipment_id, EquipmentStatus::Retired);
                }
            }

            // Advance cursor after successful apply.
            cursors.insert(key, seq);
        }

        Ok(())
    }

    fn set_status(&self, lab_id: LabId, equipment_id: EquipmentId, status: EquipmentStatus) {
        if let Some(mut summary) = self.store.get(lab_id, &equipment_id) {
            summary.status = status;
            self.store.upsert(lab_id, equipment_id, summary);
        }
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), EquipmentDirectoryError> {
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
