use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labtrack_core::{Aggregate, AggregateId, AggregateRoot, DomainError, LabId, UserId};
use labtrack_events::Event;

/// Stream type identifier used by the event store and projections.
pub const AGGREGATE_TYPE: &str = "inventory.stock_item";

/// Stock item identifier (lab-scoped via `lab_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockItemId(pub AggregateId);

impl StockItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Catalog the item belongs to. Lab consumables and NGS reagents share one
/// aggregate shape; the kind is stamped on every ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Lab,
    Ngs,
}

/// Aggregate root: a stocked item.
///
/// Current stock is the fold of the signed deltas in the item's event stream
/// and can never go negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: StockItemId,
    lab_id: Option<LabId>,
    kind: ItemKind,
    name: String,
    unit: String,
    catalog_number: Option<String>,
    reorder_point: Option<i64>,
    stock: i64,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockItemId) -> Self {
        Self {
            id,
            lab_id: None,
            kind: ItemKind::Lab,
            name: String::new(),
            unit: String::new(),
            catalog_number: None,
            reorder_point: None,
            stock: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockItemId {
        self.id
    }

    pub fn lab_id(&self) -> Option<LabId> {
        self.lab_id
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn stock(&self) -> i64 {
        self.stock
    }

    pub fn reorder_point(&self) -> Option<i64> {
        self.reorder_point
    }

    /// Low-stock signal: on-hand quantity at or under the reorder point.
    pub fn below_reorder(&self) -> bool {
        matches!(self.reorder_point, Some(point) if self.stock <= point)
    }
}

impl AggregateRoot for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterItem {
    pub lab_id: LabId,
    pub item_id: StockItemId,
    pub kind: ItemKind,
    pub name: String,
    pub unit: String,
    pub catalog_number: Option<String>,
    pub reorder_point: Option<i64>,
    pub initial_stock: i64,
    pub registered_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConsumeStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeStock {
    pub lab_id: LabId,
    pub item_id: StockItemId,
    pub quantity: i64,
    pub reason: Option<String>,
    pub consumed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (absolute set, e.g. after a physical count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub lab_id: LabId,
    pub item_id: StockItemId,
    pub new_quantity: i64,
    pub reason: Option<String>,
    pub adjusted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    RegisterItem(RegisterItem),
    ConsumeStock(ConsumeStock),
    AdjustStock(AdjustStock),
}

/// Event: ItemRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRegistered {
    pub lab_id: LabId,
    pub item_id: StockItemId,
    pub kind: ItemKind,
    pub name: String,
    pub unit: String,
    pub catalog_number: Option<String>,
    pub reorder_point: Option<i64>,
    pub initial_stock: i64,
    pub registered_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockConsumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockConsumed {
    pub lab_id: LabId,
    pub item_id: StockItemId,
    pub kind: ItemKind,
    pub quantity: i64,
    /// Stock on hand after the consumption, as decided by the aggregate.
    pub remaining: i64,
    pub reason: Option<String>,
    pub consumed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub lab_id: LabId,
    pub item_id: StockItemId,
    pub kind: ItemKind,
    pub previous: i64,
    pub new_quantity: i64,
    pub reason: Option<String>,
    pub adjusted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    ItemRegistered(ItemRegistered),
    StockConsumed(StockConsumed),
    StockAdjusted(StockAdjusted),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::ItemRegistered(_) => "inventory.stock_item.registered",
            StockEvent::StockConsumed(_) => "inventory.stock_item.consumed",
            StockEvent::StockAdjusted(_) => "inventory.stock_item.adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::ItemRegistered(e) => e.occurred_at,
            StockEvent::StockConsumed(e) => e.occurred_at,
            StockEvent::StockAdjusted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::ItemRegistered(e) => {
                self.id = e.item_id;
                self.lab_id = Some(e.lab_id);
                self.kind = e.kind;
                self.name = e.name.clone();
                self.unit = e.unit.clone();
                self.catalog_number = e.catalog_number.clone();
                self.reorder_point = e.reorder_point;
                self.stock = e.initial_stock;
                self.created = true;
            }
            StockEvent::StockConsumed(e) => {
                self.stock -= e.quantity;
            }
            StockEvent::StockAdjusted(e) => {
                self.stock = e.new_quantity;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::RegisterItem(cmd) => self.handle_register(cmd),
            StockCommand::ConsumeStock(cmd) => self.handle_consume(cmd),
            StockCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
        }
    }
}

impl StockItem {
    fn ensure_lab(&self, lab_id: LabId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.lab_id != Some(lab_id) {
            return Err(DomainError::invariant("lab mismatch"));
        }
        Ok(())
    }

    fn ensure_item_id(&self, item_id: StockItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterItem) -> Result<Vec<StockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("item already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit.trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        if cmd.initial_stock < 0 {
            return Err(DomainError::validation("initial_stock cannot be negative"));
        }
        if matches!(cmd.reorder_point, Some(point) if point < 0) {
            return Err(DomainError::validation("reorder_point cannot be negative"));
        }

        Ok(vec![StockEvent::ItemRegistered(ItemRegistered {
            lab_id: cmd.lab_id,
            item_id: cmd.item_id,
            kind: cmd.kind,
            name: cmd.name.clone(),
            unit: cmd.unit.clone(),
            catalog_number: cmd.catalog_number.clone(),
            reorder_point: cmd.reorder_point,
            initial_stock: cmd.initial_stock,
            registered_by: cmd.registered_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_consume(&self, cmd: &ConsumeStock) -> Result<Vec<StockEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        if self.stock < cmd.quantity {
            return Err(DomainError::insufficient_stock(cmd.quantity, self.stock));
        }

        Ok(vec![StockEvent::StockConsumed(StockConsumed {
            lab_id: cmd.lab_id,
            item_id: cmd.item_id,
            kind: self.kind,
            quantity: cmd.quantity,
            remaining: self.stock - cmd.quantity,
            reason: cmd.reason.clone(),
            consumed_by: cmd.consumed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Re-adjusting to the current quantity still emits an event: the ledger
    /// records every count, it is not deduplicated.
    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<StockEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.new_quantity < 0 {
            return Err(DomainError::validation("stock cannot be negative"));
        }

        Ok(vec![StockEvent::StockAdjusted(StockAdjusted {
            lab_id: cmd.lab_id,
            item_id: cmd.item_id,
            kind: self.kind,
            previous: self.stock,
            new_quantity: cmd.new_quantity,
            reason: cmd.reason.clone(),
            adjusted_by: cmd.adjusted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
