use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use labtrack_core::{AggregateId, ExpectedVersion, LabId};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: produced by an aggregate's `handle()` method
/// 2. **UncommittedEvent**: wrapped with stream metadata (lab_id, aggregate_id, ...)
/// 3. **StoredEvent**: persisted with an assigned sequence_number
/// 4. **EventEnvelope**: published to the event bus for projections
///
/// ## Construction
///
/// Use `UncommittedEvent::from_typed()` to build one from a typed domain event.
/// It serializes the payload to JSON and captures the event metadata
/// (event_type, version, occurred_at) needed to deserialize it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub lab_id: LabId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// ## Sequence Numbers
///
/// Sequence numbers are assigned by the event store during append and are:
/// - **Monotonically increasing**: each event gets the next number (last + 1)
/// - **Stream-scoped**: numbering restarts per stream (lab_id + aggregate_id)
/// - **Immutable**: once assigned, a sequence number never changes
///
/// They give the system ordering, optimistic concurrency (the version check
/// compares against the highest sequence number) and idempotent projections
/// (a projection skips sequence numbers it has already applied).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub lab_id: LabId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into a lab-scoped event envelope for publication.
    pub fn to_envelope(&self) -> labtrack_events::EventEnvelope<JsonValue> {
        labtrack_events::EventEnvelope::new(
            self.event_id,
            self.lab_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, isolation) as
/// opposed to domain errors (validation, invariants).
///
/// - **Concurrency**: optimistic concurrency check failed (version mismatch,
///   or a concurrent writer won the race to the same sequence number)
/// - **LabIsolation**: cross-lab access attempted
/// - **AggregateTypeMismatch**: append targeted a stream owned by a different
///   aggregate type
/// - **InvalidAppend**: invalid event data, stream state, or storage failure
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("lab isolation violation: {0}")]
    LabIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

/// Append-only, lab-scoped event store.
///
/// Events are organized into **streams**, one stream per aggregate instance,
/// keyed by `(lab_id, aggregate_id)`. Within a stream, events carry
/// monotonically increasing sequence numbers (1, 2, 3, ...).
///
/// The append is the serialization point for every check-then-record decision
/// in the system. A booking slot's conflict window and a stock item's balance
/// are both validated against a loaded stream at version `v`, and the append
/// demands the stream is still at `v`. Two racing writers both pass their
/// in-memory checks, but only one append lands; the loser gets
/// `EventStoreError::Concurrency` and must reload and re-decide.
///
/// ## Append Semantics
///
/// `append()`:
/// - validates lab isolation (all events must belong to one lab)
/// - validates aggregate scoping (all events must target one aggregate)
/// - checks optimistic concurrency against the current stream version
/// - assigns sequence numbers starting at `current_version + 1`
/// - persists the batch atomically (all or nothing)
///
/// ## Load Semantics
///
/// `load_stream()` returns all events for the lab + aggregate in sequence
/// number order, or an empty vector when the stream does not exist yet.
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate stream (append-only).
    ///
    /// Implementations must:
    /// - enforce lab isolation
    /// - enforce optimistic concurrency against the current stream version
    /// - assign monotonically increasing `sequence_number`s starting at `current_version + 1`
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for a lab + aggregate.
    fn load_stream(
        &self,
        lab_id: LabId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(
        &self,
        lab_id: LabId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(lab_id, aggregate_id)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// Keeps infra decoupled from the domain crates while still capturing the
    /// event metadata needed for future deserialization.
    pub fn from_typed<E>(
        lab_id: LabId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: labtrack_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            lab_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
