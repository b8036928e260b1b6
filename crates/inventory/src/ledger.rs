//! Ledger rows derived from stock events.
//!
//! The event stream is the source of truth; a [`LedgerEntry`] is the
//! flattened, append-only transaction record the read side keeps per item.
//! Entries are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labtrack_core::UserId;

use crate::item::{ItemKind, StockEvent, StockItemId};

/// Reference recorded on the opening IN entry of a freshly registered item.
pub const INITIAL_STOCK_REFERENCE: &str = "INITIAL_STOCK";

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryKind {
    In,
    Out,
    Adjustment,
}

/// One immutable row of an item's transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub item_id: StockItemId,
    pub item_kind: ItemKind,
    pub entry_kind: LedgerEntryKind,
    /// Magnitude of the movement; the sign lives in `delta`.
    pub quantity: i64,
    /// Signed stock change: positive for IN, negative for OUT, either way
    /// for ADJUSTMENT.
    pub delta: i64,
    pub reference: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Ledger row for one stock event, or `None` when the event moves no
    /// stock (registration without initial stock).
    pub fn from_event(event: &StockEvent) -> Option<LedgerEntry> {
        match event {
            StockEvent::ItemRegistered(e) if e.initial_stock > 0 => Some(LedgerEntry {
                item_id: e.item_id,
                item_kind: e.kind,
                entry_kind: LedgerEntryKind::In,
                quantity: e.initial_stock,
                delta: e.initial_stock,
                reference: Some(INITIAL_STOCK_REFERENCE.to_string()),
                actor: e.registered_by,
                occurred_at: e.occurred_at,
            }),
            StockEvent::ItemRegistered(_) => None,
            StockEvent::StockConsumed(e) => Some(LedgerEntry {
                item_id: e.item_id,
                item_kind: e.kind,
                entry_kind: LedgerEntryKind::Out,
                quantity: e.quantity,
                delta: -e.quantity,
                reference: e.reason.clone(),
                actor: e.consumed_by,
                occurred_at: e.occurred_at,
            }),
            StockEvent::StockAdjusted(e) => {
                let delta = e.new_quantity - e.previous;
                Some(LedgerEntry {
                    item_id: e.item_id,
                    item_kind: e.kind,
                    entry_kind: LedgerEntryKind::Adjustment,
                    quantity: delta.abs(),
                    delta,
                    reference: e.reason.clone(),
                    actor: e.adjusted_by,
                    occurred_at: e.occurred_at,
                })
            }
        }
    }
}
