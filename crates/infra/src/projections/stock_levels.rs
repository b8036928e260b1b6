use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use labtrack_core::{AggregateId, LabId};
use labtrack_events::EventEnvelope;
use labtrack_inventory::{ItemKind, StockEvent, StockItemId};

use crate::read_model::LabStore;

/// Queryable stock read model: current on-hand quantity per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub item_id: StockItemId,
    pub kind: ItemKind,
    pub name: String,
    pub unit: String,
    pub reorder_point: Option<i64>,
    pub on_hand: i64,
}

impl StockLevel {
    /// True when on-hand stock has dropped to or below the reorder point.
    pub fn below_reorder(&self) -> bool {
        matches!(self.reorder_point, Some(point) if self.on_hand <= point)
    }
}

/// Lab+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    lab_id: LabId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum StockLevelProjectionError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("lab isolation violation: {0}")]
    LabIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Stock level projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a lab-isolated
/// read model of current stock per item, carrying the reorder point so the
/// low-stock list is a simple filter. On-hand values come straight from the
/// committed event payloads (`remaining`, `new_quantity`); the projection
/// never recomputes balances.
#[derive(Debug)]
pub struct StockLevelProjection<S>
where
    S: LabStore<StockItemId, StockLevel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> StockLevelProjection<S>
where
    S: LabStore<StockItemId, StockLevel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query the stock level for one lab/item.
    pub fn get(&self, lab_id: LabId, item_id: &StockItemId) -> Option<StockLevel> {
        self.store.get(lab_id, item_id)
    }

    /// List all items for a lab.
    pub fn list(&self, lab_id: LabId) -> Vec<StockLevel> {
        self.store.list(lab_id)
    }

    /// Items at or below their reorder point.
    pub fn below_reorder(&self, lab_id: LabId) -> Vec<StockLevel> {
        let mut low: Vec<_> = self
            .store
            .list(lab_id)
            .into_iter()
            .filter(StockLevel::below_reorder)
            .collect();
        low.sort_by_key(|l| *l.item_id.0.as_uuid().as_bytes());
        low
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces lab isolation
    /// - Enforces monotonic sequence per (lab, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockLevelProjectionError> {
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
                return Err(StockLevelProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(StockLevelProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let event: StockEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| StockLevelProjectionError::Deserialize(e.to_string()))?;

            // Validate lab isolation at the event level.
            let (event_lab, item_id) = match &event {
                StockEvent::ItemRegistered(e) => (e.lab_id, e.item_id),
                StockEvent::StockConsumed(e) => (e.lab_id, e.item_id),
                StockEvent::StockAdjusted(e) => (e.lab_id, e.item_id),
            };

            if event_lab != lab_id {
                return Err(StockLevelProjectionError::LabIsolation(
                    "event lab_id does not match envelope lab_id".to_string(),
                ));
            }

            if item_id.0 != aggregate_id {
                return Err(StockLevelProjectionError::LabIsolation(
                    "event item_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match event {
                StockEvent::ItemRegistered(e) => {
                    self.store.upsert(
                        lab_id,
                        e.item_id,
                        StockLevel {
                            item_id: e.item_id,
                            kind: e.kind,
                            name: e.name,
                            unit: e.unit,
                            reorder_point: e.reorder_point,
                            on_hand: e.initial_stock,
                        },
                    );
                }
                StockEvent::StockConsumed(e) => {
                    if let Some(mut level) = self.store.get(lab_id, &e.item_id) {
                        level.on_hand = e.remaining;
                        self.store.upsert(lab_id, e.item_id, level);
                    }
                }
                StockEvent::StockAdjusted(e) => {
                    if let Some(mut level) = self.store.get(lab_id, &e.item_id) {
                        level.on_hand = e.new_quantity;
                        self.store.upsert(lab_id, e.item_id, level);
                    }
                }
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
    ) -> Result<(), StockLevelProjectionError> {
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
