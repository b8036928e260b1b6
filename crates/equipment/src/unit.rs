use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labtrack_core::{Aggregate, AggregateId, AggregateRoot, DomainError, LabId};
use labtrack_events::Event;

/// Stream type identifier used by the event store and projections.
pub const AGGREGATE_TYPE: &str = "equipment.unit";

/// Equipment identifier (lab-scoped via `lab_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EquipmentId(pub AggregateId);

impl EquipmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for EquipmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Equipment availability lifecycle.
///
/// `Retired` is terminal; the unit stays in the registry for history but
/// accepts no further transitions and no reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentStatus {
    Available,
    Maintenance,
    Retired,
}

/// Aggregate root: a registered piece of shared lab equipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equipment {
    id: EquipmentId,
    lab_id: Option<LabId>,
    name: String,
    category: String,
    model_number: Option<String>,
    serial_number: Option<String>,
    status: EquipmentStatus,
    version: u64,
    created: bool,
}

impl Equipment {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: EquipmentId) -> Self {
        Self {
            id,
            lab_id: None,
            name: String::new(),
            category: String::new(),
            model_number: None,
            serial_number: None,
            status: EquipmentStatus::Available,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> EquipmentId {
        self.id
    }

    pub fn lab_id(&self) -> Option<LabId> {
        self.lab_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn status(&self) -> EquipmentStatus {
        self.status
    }

    /// Check whether the unit can accept new reservations.
    pub fn is_reservable(&self) -> bool {
        self.created && self.status == EquipmentStatus::Available
    }
}

impl AggregateRoot for Equipment {
    type Id = EquipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterEquipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEquipment {
    pub lab_id: LabId,
    pub equipment_id: EquipmentId,
    pub name: String,
    pub category: String,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PlaceInMaintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceInMaintenance {
    pub lab_id: LabId,
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnToService.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnToService {
    pub lab_id: LabId,
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RetireEquipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireEquipment {
    pub lab_id: LabId,
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquipmentCommand {
    RegisterEquipment(RegisterEquipment),
    PlaceInMaintenance(PlaceInMaintenance),
    ReturnToService(ReturnToService),
    RetireEquipment(RetireEquipment),
}

/// Event: EquipmentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRegistered {
    pub lab_id: LabId,
    pub equipment_id: EquipmentId,
    pub name: String,
    pub category: String,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MaintenanceStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStarted {
    pub lab_id: LabId,
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnedToService.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedToService {
    pub lab_id: LabId,
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EquipmentRetired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRetired {
    pub lab_id: LabId,
    pub equipment_id: EquipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquipmentEvent {
    EquipmentRegistered(EquipmentRegistered),
    MaintenanceStarted(MaintenanceStarted),
    ReturnedToService(ReturnedToService),
    EquipmentRetired(EquipmentRetired),
}

impl Event for EquipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EquipmentEvent::EquipmentRegistered(_) => "equipment.unit.registered",
            EquipmentEvent::MaintenanceStarted(_) => "equipment.unit.maintenance_started",
            EquipmentEvent::ReturnedToService(_) => "equipment.unit.returned_to_service",
            EquipmentEvent::EquipmentRetired(_) => "equipment.unit.retired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EquipmentEvent::EquipmentRegistered(e) => e.occurred_at,
            EquipmentEvent::MaintenanceStarted(e) => e.occurred_at,
            EquipmentEvent::ReturnedToService(e) => e.occurred_at,
            EquipmentEvent::EquipmentRetired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Equipment {
    type Command = EquipmentCommand;
    type Event = EquipmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EquipmentEvent::EquipmentRegistered(e) => {
                self.id = e.equipment_id;
                self.lab_id = Some(e.lab_id);
                self.name = e.name.clone();
                self.category = e.category.clone();
                self.model_number = e.model_number.clone();
                self.serial_number = e.serial_number.clone();
                self.status = EquipmentStatus::Available;
                self.created = true;
            }
            EquipmentEvent::MaintenanceStarted(_) => {
                self.status = EquipmentStatus::Maintenance;
            }
            EquipmentEvent::ReturnedToService(_) => {
                self.status = EquipmentStatus::Available;
            }
            EquipmentEvent::EquipmentRetired(_) => {
                self.status = EquipmentStatus::Retired;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EquipmentCommand::RegisterEquipment(cmd) => self.handle_register(cmd),
            EquipmentCommand::PlaceInMaintenance(cmd) => self.handle_maintenance(cmd),
            EquipmentCommand::ReturnToService(cmd) => self.handle_return(cmd),
            EquipmentCommand::RetireEquipment(cmd) => self.handle_retire(cmd),
        }
    }
}

impl Equipment {
    fn ensure_lab(&self, lab_id: LabId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.lab_id != Some(lab_id) {
            return Err(DomainError::invariant("lab mismatch"));
        }
        Ok(())
    }

    fn ensure_equipment_id(&self, equipment_id: EquipmentId) -> Result<(), DomainError> {
        if self.id != equipment_id {
            return Err(DomainError::invariant("equipment_id mismatch"));
        }
        Ok(())
    }

    fn ensure_not_retired(&self) -> Result<(), DomainError> {
        if self.status == EquipmentStatus::Retired {
            return Err(DomainError::invariant(
                "retired equipment cannot change state",
            ));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterEquipment) -> Result<Vec<EquipmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("equipment already registered"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.category.trim().is_empty() {
            return Err(DomainError::validation("category cannot be empty"));
        }

        Ok(vec![EquipmentEvent::EquipmentRegistered(
            EquipmentRegistered {
                lab_id: cmd.lab_id,
                equipment_id: cmd.equipment_id,
                name: cmd.name.clone(),
                category: cmd.category.clone(),
                model_number: cmd.model_number.clone(),
                serial_number: cmd.serial_number.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_maintenance(
        &self,
        cmd: &PlaceInMaintenance,
    ) -> Result<Vec<EquipmentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_equipment_id(cmd.equipment_id)?;
        self.ensure_not_retired()?;

        if self.status == EquipmentStatus::Maintenance {
            return Err(DomainError::conflict("equipment is already in maintenance"));
        }

        Ok(vec![EquipmentEvent::MaintenanceStarted(MaintenanceStarted {
            lab_id: cmd.lab_id,
            equipment_id: cmd.equipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnToService) -> Result<Vec<EquipmentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_equipment_id(cmd.equipment_id)?;
        self.ensure_not_retired()?;

        if self.status != EquipmentStatus::Maintenance {
            return Err(DomainError::conflict("equipment is not in maintenance"));
        }

        Ok(vec![EquipmentEvent::ReturnedToService(ReturnedToService {
            lab_id: cmd.lab_id,
            equipment_id: cmd.equipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_retire(&self, cmd: &RetireEquipment) -> Result<Vec<EquipmentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_equipment_id(cmd.equipment_id)?;

        if self.status == EquipmentStatus::Retired {
            return Err(DomainError::conflict("equipment is already retired"));
        }

        Ok(vec![EquipmentEvent::EquipmentRetired(EquipmentRetired {
            lab_id: cmd.lab_id,
            equipment_id: cmd.equipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
