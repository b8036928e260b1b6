use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use labtrack_core::{AggregateId, LabId};
use labtrack_events::EventEnvelope;
use labtrack_inventory::{LedgerEntry, StockEvent, StockItemId};

use crate::read_model::LabStore;

/// Lab+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    lab_id: LabId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum StockLedgerProjectionError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("lab isolation violation: {0}")]
    LabIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Stock ledger projection: the per-item transaction log.
///
/// Each stock event maps to at most one [`LedgerEntry`]
/// (`LedgerEntry::from_event`); entries are appended in stream order, so an
/// item's ledger reads top to bottom as its full movement history and its
/// signed deltas sum to the current on-hand quantity.
#[derive(Debug)]
pub struct StockLedgerProjection<S>
where
    S: LabStore<StockItemId, Vec<LedgerEntry>>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> StockLedgerProjection<S>
where
    S: LabStore<StockItemId, Vec<LedgerEntry>>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// The transaction log for one item, oldest first. Empty if the item has
    /// no recorded movements.
    pub fn entries(&self, lab_id: LabId, item_id: &StockItemId) -> Vec<LedgerEntry> {
        self.store.get(lab_id, item_id).unwrap_or_default()
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces lab isolation
    /// - Enforces monotonic sequence per (lab, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockLedgerProjectionError> {
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
                return Err(StockLedgerProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(StockLedgerProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let event: StockEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| StockLedgerProjectionError::Deserialize(e.to_string()))?;

            // Validate lab isolation at the event level.
            let (event_lab, item_id) = match &event {
                StockEvent::ItemRegistered(e) => (e.lab_id, e.item_id),
                StockEvent::StockConsumed(e) => (e.lab_id, e.item_id),
                StockEvent::StockAdjusted(e) => (e.lab_id, e.item_id),
            };

            if event_lab != lab_id {
                return Err(StockLedgerProjectionError::LabIsolation(
                    "event lab_id does not match envelope lab_id".to_string(),
                ));
            }

            if item_id.0 != aggregate_id {
                return Err(StockLedgerProjectionError::LabIsolation(
                    "event item_id does not match envelope aggregate_id".to_string(),
                ));
            }

            // Registrations with zero initial stock produce no ledger row;
            // the cursor still advances so replays stay idempotent.
            if let Some(entry) = LedgerEntry::from_event(&event) {
                let mut log = self.store.get(lab_id, &item_id).unwrap_or_default();
                log.push(entry);
                self.store.upsert(lab_id, item_id, log);
            }

            // Advance cursor after successful apply.
            cursors.insert(key, seq);
        }

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockLedgerProjectionError> {
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
