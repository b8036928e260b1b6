use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use labtrack_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Entity, LabId, UserId};
use labtrack_equipment::EquipmentId;
use labtrack_events::Event;

use crate::time_range::TimeRange;

/// Stream type identifier used by the event store and projections.
pub const AGGREGATE_TYPE: &str = "booking.schedule";

/// Namespace for deriving slot schedule stream ids (UUIDv5).
const SCHEDULE_NAMESPACE: Uuid = Uuid::from_u128(0x6c1d_9f2e_3b84_4a71_8e5f_02d7_c4a9_b360);

/// Slot schedule identifier.
///
/// Derived deterministically from the slot key (equipment, date), so every
/// process that tries to reserve the same slot addresses the same stream and
/// the store's version check serializes the writers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub AggregateId);

impl ScheduleId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Deterministic id for the (equipment, date) slot stream.
    pub fn for_slot(equipment_id: EquipmentId, date: NaiveDate) -> Self {
        let key = format!("{equipment_id}:{date}");
        Self(AggregateId::derived(&SCHEDULE_NAMESPACE, key.as_bytes()))
    }
}

impl core::fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Booking identifier (entity inside the slot schedule aggregate).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub Uuid);

impl BookingId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for BookingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Usage session identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Booking status lifecycle.
///
/// `Pending` and `Approved` hold a claim on the time slot; the terminal
/// states release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Statuses that keep the time window unavailable to other requests.
    pub fn blocks_slot(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }
}

/// Booking entity: one reservation request inside the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: BookingId,
    pub requested_by: UserId,
    pub range: TimeRange,
    pub purpose: Option<String>,
    pub status: BookingStatus,
}

impl Entity for Booking {
    type Id = BookingId;

    fn id(&self) -> &BookingId {
        &self.booking_id
    }
}

/// Usage session entity: actual time spent on the unit under a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSession {
    pub session_id: SessionId,
    pub booking_id: BookingId,
    pub started_by: UserId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl UsageSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

impl Entity for UsageSession {
    type Id = SessionId;

    fn id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Aggregate root: all bookings for one piece of equipment on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSchedule {
    id: ScheduleId,
    lab_id: Option<LabId>,
    equipment_id: Option<EquipmentId>,
    date: Option<NaiveDate>,
    bookings: Vec<Booking>,
    sessions: Vec<UsageSession>,
    version: u64,
    created: bool,
}

impl SlotSchedule {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    ///
    /// The first accepted booking request establishes the slot key; there is
    /// no separate create command for a schedule.
    pub fn empty(id: ScheduleId) -> Self {
        Self {
            id,
            lab_id: None,
            equipment_id: None,
            date: None,
            bookings: Vec::new(),
            sessions: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ScheduleId {
        self.id
    }

    pub fn lab_id(&self) -> Option<LabId> {
        self.lab_id
    }

    pub fn equipment_id(&self) -> Option<EquipmentId> {
        self.equipment_id
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn sessions(&self) -> &[UsageSession] {
        &self.sessions
    }

    pub fn booking(&self, booking_id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.booking_id == booking_id)
    }

    pub fn session(&self, session_id: SessionId) -> Option<&UsageSession> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    /// The session currently running on the unit, if any.
    pub fn open_session(&self) -> Option<&UsageSession> {
        self.sessions.iter().find(|s| s.is_open())
    }

    /// Earliest booking holding a claim on a window that overlaps `range`.
    fn first_conflict(&self, range: TimeRange) -> Option<&Booking> {
        self.bookings
            .iter()
            .find(|b| b.status.blocks_slot() && b.range.overlaps(&range))
    }
}

impl AggregateRoot for SlotSchedule {
    type Id = ScheduleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestBooking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBooking {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub equipment_id: EquipmentId,
    pub date: NaiveDate,
    pub booking_id: BookingId,
    pub requested_by: UserId,
    pub range: TimeRange,
    pub purpose: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveBooking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveBooking {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectBooking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectBooking {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    pub rejected_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelBooking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBooking {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartSession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSession {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    pub session_id: SessionId,
    pub started_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EndSession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSession {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub session_id: SessionId,
    pub ended_by: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleCommand {
    RequestBooking(RequestBooking),
    ApproveBooking(ApproveBooking),
    RejectBooking(RejectBooking),
    CancelBooking(CancelBooking),
    StartSession(StartSession),
    EndSession(EndSession),
}

/// Event: BookingRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequested {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub equipment_id: EquipmentId,
    pub date: NaiveDate,
    pub booking_id: BookingId,
    pub requested_by: UserId,
    pub range: TimeRange,
    pub purpose: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingApproved {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRejected {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    pub rejected_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCancelled {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SessionStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStarted {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    pub session_id: SessionId,
    pub started_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SessionEnded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnded {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub session_id: SessionId,
    pub booking_id: BookingId,
    pub ended_by: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BookingCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCompleted {
    pub lab_id: LabId,
    pub schedule_id: ScheduleId,
    pub booking_id: BookingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    BookingRequested(BookingRequested),
    BookingApproved(BookingApproved),
    BookingRejected(BookingRejected),
    BookingCancelled(BookingCancelled),
    SessionStarted(SessionStarted),
    SessionEnded(SessionEnded),
    BookingCompleted(BookingCompleted),
}

impl Event for ScheduleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ScheduleEvent::BookingRequested(_) => "booking.schedule.requested",
            ScheduleEvent::BookingApproved(_) => "booking.schedule.approved",
            ScheduleEvent::BookingRejected(_) => "booking.schedule.rejected",
            ScheduleEvent::BookingCancelled(_) => "booking.schedule.cancelled",
            ScheduleEvent::SessionStarted(_) => "booking.schedule.session_started",
            ScheduleEvent::SessionEnded(_) => "booking.schedule.session_ended",
            ScheduleEvent::BookingCompleted(_) => "booking.schedule.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ScheduleEvent::BookingRequested(e) => e.occurred_at,
            ScheduleEvent::BookingApproved(e) => e.occurred_at,
            ScheduleEvent::BookingRejected(e) => e.occurred_at,
            ScheduleEvent::BookingCancelled(e) => e.occurred_at,
            ScheduleEvent::SessionStarted(e) => e.occurred_at,
            ScheduleEvent::SessionEnded(e) => e.occurred_at,
            ScheduleEvent::BookingCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SlotSchedule {
    type Command = ScheduleCommand;
    type Event = ScheduleEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ScheduleEvent::BookingRequested(e) => {
                self.id = e.schedule_id;
                self.lab_id = Some(e.lab_id);
                self.equipment_id = Some(e.equipment_id);
                self.date = Some(e.date);
                self.bookings.push(Booking {
                    booking_id: e.booking_id,
                    requested_by: e.requested_by,
                    range: e.range,
                    purpose: e.purpose.clone(),
                    status: BookingStatus::Pending,
                });
                self.created = true;
            }
            ScheduleEvent::BookingApproved(e) => {
                self.set_status(e.booking_id, BookingStatus::Approved);
            }
            ScheduleEvent::BookingRejected(e) => {
                self.set_status(e.booking_id, BookingStatus::Rejected);
            }
            ScheduleEvent::BookingCancelled(e) => {
                self.set_status(e.booking_id, BookingStatus::Cancelled);
            }
            ScheduleEvent::SessionStarted(e) => {
                self.sessions.push(UsageSession {
                    session_id: e.session_id,
                    booking_id: e.booking_id,
                    started_by: e.started_by,
                    started_at: e.occurred_at,
                    ended_at: None,
                });
            }
            ScheduleEvent::SessionEnded(e) => {
                if let Some(session) =
                    self.sessions.iter_mut().find(|s| s.session_id == e.session_id)
                {
                    session.ended_at = Some(e.occurred_at);
                }
            }
            ScheduleEvent::BookingCompleted(e) => {
                self.set_status(e.booking_id, BookingStatus::Completed);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ScheduleCommand::RequestBooking(cmd) => self.handle_request(cmd),
            ScheduleCommand::ApproveBooking(cmd) => self.handle_approve(cmd),
            ScheduleCommand::RejectBooking(cmd) => self.handle_reject(cmd),
            ScheduleCommand::CancelBooking(cmd) => self.handle_cancel(cmd),
            ScheduleCommand::StartSession(cmd) => self.handle_start_session(cmd),
            ScheduleCommand::EndSession(cmd) => self.handle_end_session(cmd),
        }
    }
}

impl SlotSchedule {
    fn set_status(&mut self, booking_id: BookingId, status: BookingStatus) {
        if let Some(booking) = self.bookings.iter_mut().find(|b| b.booking_id == booking_id) {
            booking.status = status;
        }
    }

    fn ensure_lab(&self, lab_id: LabId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.lab_id != Some(lab_id) {
            return Err(DomainError::invariant("lab mismatch"));
        }
        Ok(())
    }

    fn ensure_schedule_id(&self, schedule_id: ScheduleId) -> Result<(), DomainError> {
        if self.id != schedule_id {
            return Err(DomainError::invariant("schedule_id mismatch"));
        }
        Ok(())
    }

    fn ensure_slot_key(&self, equipment_id: EquipmentId, date: NaiveDate) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.equipment_id != Some(equipment_id) || self.date != Some(date) {
            return Err(DomainError::invariant("slot key mismatch"));
        }
        Ok(())
    }

    fn handle_request(&self, cmd: &RequestBooking) -> Result<Vec<ScheduleEvent>, DomainError> {
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_schedule_id(cmd.schedule_id)?;
        self.ensure_slot_key(cmd.equipment_id, cmd.date)?;

        if self.booking(cmd.booking_id).is_some() {
            return Err(DomainError::conflict("booking already exists"));
        }

        if let Some(existing) = self.first_conflict(cmd.range) {
            return Err(DomainError::slot_taken(existing.booking_id.0));
        }

        Ok(vec![ScheduleEvent::BookingRequested(BookingRequested {
            lab_id: cmd.lab_id,
            schedule_id: cmd.schedule_id,
            equipment_id: cmd.equipment_id,
            date: cmd.date,
            booking_id: cmd.booking_id,
            requested_by: cmd.requested_by,
            range: cmd.range,
            purpose: cmd.purpose.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveBooking) -> Result<Vec<ScheduleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_schedule_id(cmd.schedule_id)?;

        let booking = self.booking(cmd.booking_id).ok_or_else(DomainError::not_found)?;

        if booking.status != BookingStatus::Pending {
            return Err(DomainError::invariant("only pending bookings can be approved"));
        }

        // An approved booking must never overlap another approved window,
        // whatever the stream history looks like.
        if let Some(existing) = self.bookings.iter().find(|b| {
            b.booking_id != cmd.booking_id
                && b.status == BookingStatus::Approved
                && b.range.overlaps(&booking.range)
        }) {
            return Err(DomainError::slot_taken(existing.booking_id.0));
        }

        Ok(vec![ScheduleEvent::BookingApproved(BookingApproved {
            lab_id: cmd.lab_id,
            schedule_id: cmd.schedule_id,
            booking_id: cmd.booking_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectBooking) -> Result<Vec<ScheduleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_schedule_id(cmd.schedule_id)?;

        let booking = self.booking(cmd.booking_id).ok_or_else(DomainError::not_found)?;

        if booking.status != BookingStatus::Pending {
            return Err(DomainError::invariant("only pending bookings can be rejected"));
        }

        Ok(vec![ScheduleEvent::BookingRejected(BookingRejected {
            lab_id: cmd.lab_id,
            schedule_id: cmd.schedule_id,
            booking_id: cmd.booking_id,
            rejected_by: cmd.rejected_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelBooking) -> Result<Vec<ScheduleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_schedule_id(cmd.schedule_id)?;

        let booking = self.booking(cmd.booking_id).ok_or_else(DomainError::not_found)?;

        if booking.requested_by != cmd.cancelled_by {
            return Err(DomainError::Unauthorized);
        }

        if booking.status != BookingStatus::Pending {
            return Err(DomainError::invariant("only pending bookings can be cancelled"));
        }

        Ok(vec![ScheduleEvent::BookingCancelled(BookingCancelled {
            lab_id: cmd.lab_id,
            schedule_id: cmd.schedule_id,
            booking_id: cmd.booking_id,
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_session(&self, cmd: &StartSession) -> Result<Vec<ScheduleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_schedule_id(cmd.schedule_id)?;

        let booking = self.booking(cmd.booking_id).ok_or_else(DomainError::not_found)?;

        if booking.status != BookingStatus::Approved {
            return Err(DomainError::invariant(
                "sessions can only start on approved bookings",
            ));
        }

        if booking.requested_by != cmd.started_by {
            return Err(DomainError::Unauthorized);
        }

        if self.sessions.iter().any(|s| s.booking_id == cmd.booking_id) {
            return Err(DomainError::conflict("booking already has a usage session"));
        }

        if let Some(open) = self.open_session() {
            return Err(DomainError::conflict(format!(
                "equipment is in use by session {}",
                open.session_id
            )));
        }

        Ok(vec![ScheduleEvent::SessionStarted(SessionStarted {
            lab_id: cmd.lab_id,
            schedule_id: cmd.schedule_id,
            booking_id: cmd.booking_id,
            session_id: cmd.session_id,
            started_by: cmd.started_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Ending a session also completes its booking; both events land in one
    /// atomic append so a crash cannot leave a closed session on an
    /// approved booking.
    fn handle_end_session(&self, cmd: &EndSession) -> Result<Vec<ScheduleEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_lab(cmd.lab_id)?;
        self.ensure_schedule_id(cmd.schedule_id)?;

        let session = self.session(cmd.session_id).ok_or_else(DomainError::not_found)?;

        if !session.is_open() {
            return Err(DomainError::conflict("session already ended"));
        }

        let booking = self
            .booking(session.booking_id)
            .ok_or_else(DomainError::not_found)?;

        if booking.status != BookingStatus::Approved {
            return Err(DomainError::invariant(
                "session does not belong to an approved booking",
            ));
        }

        Ok(vec![
            ScheduleEvent::SessionEnded(SessionEnded {
                lab_id: cmd.lab_id,
                schedule_id: cmd.schedule_id,
                session_id: cmd.session_id,
                booking_id: session.booking_id,
                ended_by: cmd.ended_by,
                notes: cmd.notes.clone(),
                occurred_at: cmd.occurred_at,
            }),
            ScheduleEvent::BookingCompleted(BookingCompleted {
                lab_id: cmd.lab_id,
                schedule_id: cmd.schedule_id,
                booking_id: session.booking_id,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labtrack_core::AggregateId;

    fn test_lab_id() -> LabId {
        LabId::new()
    }

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn test_equipment_id() -> EquipmentId {
        EquipmentId::new(AggregateId::new())
    }

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 12).unwrap()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn range(start: u16, end: u16) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    struct Slot {
        lab_id: LabId,
        schedule_id: ScheduleId,
        equipment_id: EquipmentId,
        date: NaiveDate,
    }

    fn test_slot() -> Slot {
        let equipment_id = test_equipment_id();
        let date = test_date();
        Slot {
            lab_id: test_lab_id(),
            schedule_id: ScheduleId::for_slot(equipment_id, date),
            equipment_id,
            date,
        }
    }

    fn request_cmd(slot: &Slot, booking_id: BookingId, by: UserId, r: TimeRange) -> RequestBooking {
        RequestBooking {
            lab_id: slot.lab_id,
            schedule_id: slot.schedule_id,
            equipment_id: slot.equipment_id,
            date: slot.date,
            booking_id,
            requested_by: by,
            range: r,
            purpose: None,
            occurred_at: test_time(),
        }
    }

    fn apply_all(schedule: &mut SlotSchedule, events: &[ScheduleEvent]) {
        for event in events {
            schedule.apply(event);
        }
    }

    #[test]
    fn schedule_id_is_deterministic_for_slot_key() {
        let equipment_id = test_equipment_id();
        let date = test_date();
        let a = ScheduleId::for_slot(equipment_id, date);
        let b = ScheduleId::for_slot(equipment_id, date);
        let next_day = ScheduleId::for_slot(equipment_id, date.succ_opt().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, next_day);
    }

    #[test]
    fn request_emits_booking_requested_and_booking_starts_pending() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let booking_id = BookingId::new();
        let requester = test_user_id();

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                booking_id,
                requester,
                range(540, 600),
            )))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            ScheduleEvent::BookingRequested(e) => {
                assert_eq!(e.booking_id, booking_id);
                assert_eq!(e.requested_by, requester);
                assert_eq!(e.range, range(540, 600));
            }
            _ => panic!("Expected BookingRequested event"),
        }

        apply_all(&mut schedule, &events);
        let booking = schedule.booking(booking_id).unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(schedule.equipment_id(), Some(slot.equipment_id));
        assert_eq!(schedule.date(), Some(slot.date));
    }

    #[test]
    fn overlapping_request_reports_the_conflicting_booking() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let first = BookingId::new();

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                first,
                test_user_id(),
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);

        // 09:30-10:30 against an existing 09:00-10:00 booking.
        let err = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                BookingId::new(),
                test_user_id(),
                range(570, 630),
            )))
            .unwrap_err();
        match err {
            DomainError::SlotTaken { conflicting_booking } => {
                assert_eq!(conflicting_booking, first.0);
            }
            _ => panic!("Expected SlotTaken for overlapping request"),
        }

        // 10:00-11:00 touches the boundary only and must succeed.
        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                BookingId::new(),
                test_user_id(),
                range(600, 660),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);
        assert_eq!(schedule.bookings().len(), 2);
    }

    #[test]
    fn terminal_bookings_release_their_window() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let requester = test_user_id();
        let first = BookingId::new();

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                first,
                requester,
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);

        let events = schedule
            .handle(&ScheduleCommand::CancelBooking(CancelBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id: first,
                cancelled_by: requester,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);

        // Same window again: the cancelled booking no longer blocks it.
        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                BookingId::new(),
                test_user_id(),
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);
        assert_eq!(schedule.bookings().len(), 2);
    }

    #[test]
    fn approve_transitions_pending_to_approved() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let booking_id = BookingId::new();

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                booking_id,
                test_user_id(),
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);

        let events = schedule
            .handle(&ScheduleCommand::ApproveBooking(ApproveBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                approved_by: test_user_id(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);
        assert_eq!(schedule.booking(booking_id).unwrap().status, BookingStatus::Approved);

        // A second approval finds the booking no longer pending.
        let err = schedule
            .handle(&ScheduleCommand::ApproveBooking(ApproveBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                approved_by: test_user_id(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("only pending") => {}
            _ => panic!("Expected InvariantViolation for double approval"),
        }
    }

    #[test]
    fn approve_rechecks_window_against_approved_bookings() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let first = BookingId::new();
        let second = BookingId::new();
        let requester = test_user_id();

        // Replay a stream in which two overlapping requests were both
        // accepted before one of them was approved.
        schedule.apply(&ScheduleEvent::BookingRequested(BookingRequested {
            lab_id: slot.lab_id,
            schedule_id: slot.schedule_id,
            equipment_id: slot.equipment_id,
            date: slot.date,
            booking_id: first,
            requested_by: requester,
            range: range(540, 600),
            purpose: None,
            occurred_at: test_time(),
        }));
        schedule.apply(&ScheduleEvent::BookingRequested(BookingRequested {
            lab_id: slot.lab_id,
            schedule_id: slot.schedule_id,
            equipment_id: slot.equipment_id,
            date: slot.date,
            booking_id: second,
            requested_by: requester,
            range: range(570, 630),
            purpose: None,
            occurred_at: test_time(),
        }));
        schedule.apply(&ScheduleEvent::BookingApproved(BookingApproved {
            lab_id: slot.lab_id,
            schedule_id: slot.schedule_id,
            booking_id: first,
            approved_by: requester,
            occurred_at: test_time(),
        }));

        let err = schedule
            .handle(&ScheduleCommand::ApproveBooking(ApproveBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id: second,
                approved_by: requester,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::SlotTaken { conflicting_booking } => {
                assert_eq!(conflicting_booking, first.0);
            }
            _ => panic!("Expected SlotTaken when approving into an approved window"),
        }
    }

    #[test]
    fn cancel_is_owner_only_and_pending_only() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let booking_id = BookingId::new();
        let owner = test_user_id();

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                booking_id,
                owner,
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);

        let err = schedule
            .handle(&ScheduleCommand::CancelBooking(CancelBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                cancelled_by: test_user_id(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::Unauthorized => {}
            _ => panic!("Expected Unauthorized for non-owner cancellation"),
        }

        let events = schedule
            .handle(&ScheduleCommand::ApproveBooking(ApproveBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                approved_by: test_user_id(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);

        let err = schedule
            .handle(&ScheduleCommand::CancelBooking(CancelBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                cancelled_by: owner,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("only pending") => {}
            _ => panic!("Expected InvariantViolation for cancelling approved booking"),
        }
    }

    #[test]
    fn reject_requires_pending_booking() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let booking_id = BookingId::new();
        let owner = test_user_id();

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                booking_id,
                owner,
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);

        let events = schedule
            .handle(&ScheduleCommand::RejectBooking(RejectBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                rejected_by: test_user_id(),
                reason: Some("maintenance window".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);
        assert_eq!(schedule.booking(booking_id).unwrap().status, BookingStatus::Rejected);

        let err = schedule
            .handle(&ScheduleCommand::RejectBooking(RejectBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                rejected_by: test_user_id(),
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("only pending") => {}
            _ => panic!("Expected InvariantViolation for double rejection"),
        }
    }

    #[test]
    fn session_lifecycle_completes_the_booking_atomically() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let booking_id = BookingId::new();
        let session_id = SessionId::new();
        let owner = test_user_id();

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                booking_id,
                owner,
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);

        let events = schedule
            .handle(&ScheduleCommand::ApproveBooking(ApproveBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                approved_by: test_user_id(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);

        let events = schedule
            .handle(&ScheduleCommand::StartSession(StartSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                session_id,
                started_by: owner,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);
        assert!(schedule.open_session().is_some());

        let events = schedule
            .handle(&ScheduleCommand::EndSession(EndSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                session_id,
                ended_by: owner,
                notes: Some("laser realigned".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 2);
        match (&events[0], &events[1]) {
            (ScheduleEvent::SessionEnded(ended), ScheduleEvent::BookingCompleted(completed)) => {
                assert_eq!(ended.session_id, session_id);
                assert_eq!(ended.booking_id, booking_id);
                assert_eq!(completed.booking_id, booking_id);
            }
            _ => panic!("Expected SessionEnded followed by BookingCompleted"),
        }

        apply_all(&mut schedule, &events);
        assert_eq!(schedule.booking(booking_id).unwrap().status, BookingStatus::Completed);
        assert!(schedule.open_session().is_none());
        assert!(schedule.session(session_id).unwrap().ended_at.is_some());
    }

    #[test]
    fn start_session_requires_approved_booking_and_owner() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let booking_id = BookingId::new();
        let owner = test_user_id();

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                booking_id,
                owner,
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);

        let err = schedule
            .handle(&ScheduleCommand::StartSession(StartSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                session_id: SessionId::new(),
                started_by: owner,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("approved") => {}
            _ => panic!("Expected InvariantViolation for session on pending booking"),
        }

        let events = schedule
            .handle(&ScheduleCommand::ApproveBooking(ApproveBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                approved_by: test_user_id(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);

        let err = schedule
            .handle(&ScheduleCommand::StartSession(StartSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                session_id: SessionId::new(),
                started_by: test_user_id(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::Unauthorized => {}
            _ => panic!("Expected Unauthorized for non-owner session start"),
        }
    }

    #[test]
    fn only_one_session_may_be_open_at_a_time() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let owner = test_user_id();
        let first_booking = BookingId::new();
        let second_booking = BookingId::new();

        for (booking_id, r) in [(first_booking, range(540, 600)), (second_booking, range(600, 660))] {
            let events = schedule
                .handle(&ScheduleCommand::RequestBooking(request_cmd(
                    &slot, booking_id, owner, r,
                )))
                .unwrap();
            apply_all(&mut schedule, &events);
            let events = schedule
                .handle(&ScheduleCommand::ApproveBooking(ApproveBooking {
                    lab_id: slot.lab_id,
                    schedule_id: slot.schedule_id,
                    booking_id,
                    approved_by: test_user_id(),
                    occurred_at: test_time(),
                }))
                .unwrap();
            apply_all(&mut schedule, &events);
        }

        let events = schedule
            .handle(&ScheduleCommand::StartSession(StartSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id: first_booking,
                session_id: SessionId::new(),
                started_by: owner,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);

        let err = schedule
            .handle(&ScheduleCommand::StartSession(StartSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id: second_booking,
                session_id: SessionId::new(),
                started_by: owner,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::Conflict(msg) if msg.contains("in use") => {}
            _ => panic!("Expected Conflict while another session is open"),
        }
    }

    #[test]
    fn end_session_rejects_unknown_and_closed_sessions() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        let booking_id = BookingId::new();
        let session_id = SessionId::new();
        let owner = test_user_id();

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                booking_id,
                owner,
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);

        let err = schedule
            .handle(&ScheduleCommand::EndSession(EndSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                session_id,
                ended_by: owner,
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::NotFound => {}
            _ => panic!("Expected NotFound for unknown session"),
        }

        let events = schedule
            .handle(&ScheduleCommand::ApproveBooking(ApproveBooking {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                approved_by: test_user_id(),
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);
        let events = schedule
            .handle(&ScheduleCommand::StartSession(StartSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                booking_id,
                session_id,
                started_by: owner,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);
        let events = schedule
            .handle(&ScheduleCommand::EndSession(EndSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                session_id,
                ended_by: owner,
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut schedule, &events);

        let err = schedule
            .handle(&ScheduleCommand::EndSession(EndSession {
                lab_id: slot.lab_id,
                schedule_id: slot.schedule_id,
                session_id,
                ended_by: owner,
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::Conflict(msg) if msg.contains("already ended") => {}
            _ => panic!("Expected Conflict for ending a closed session"),
        }
    }

    #[test]
    fn requests_for_a_different_slot_key_are_rejected() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                BookingId::new(),
                test_user_id(),
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);

        let mut wrong_day = request_cmd(&slot, BookingId::new(), test_user_id(), range(660, 720));
        wrong_day.date = slot.date.succ_opt().unwrap();

        let err = schedule
            .handle(&ScheduleCommand::RequestBooking(wrong_day))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("slot key mismatch") => {}
            _ => panic!("Expected InvariantViolation for slot key mismatch"),
        }
    }

    #[test]
    fn version_increments_on_apply() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);
        assert_eq!(schedule.version(), 0);

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                BookingId::new(),
                test_user_id(),
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);
        assert_eq!(schedule.version(), 1);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let slot = test_slot();
        let mut schedule = SlotSchedule::empty(slot.schedule_id);

        let events = schedule
            .handle(&ScheduleCommand::RequestBooking(request_cmd(
                &slot,
                BookingId::new(),
                test_user_id(),
                range(540, 600),
            )))
            .unwrap();
        apply_all(&mut schedule, &events);
        let version_before = schedule.version();
        let bookings_before = schedule.bookings().len();

        let cmd = ScheduleCommand::RequestBooking(request_cmd(
            &slot,
            BookingId::new(),
            test_user_id(),
            range(660, 720),
        ));
        let events1 = schedule.handle(&cmd).unwrap();
        let events2 = schedule.handle(&cmd).unwrap();

        assert_eq!(schedule.version(), version_before);
        assert_eq!(schedule.bookings().len(), bookings_before);
        assert_eq!(events1, events2);
    }
}
