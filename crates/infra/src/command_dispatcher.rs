//! Command execution pipeline (application-level orchestration).
//!
//! This module implements the **command dispatch pattern** for event-sourced
//! aggregates. It orchestrates the full lifecycle: loading history,
//! rehydrating state, handling commands, persisting events, and publishing to
//! the event bus.
//!
//! ## Command Execution Flow
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (lab-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (for projections, workers, etc.)
//! ```
//!
//! Step 4 is the serialization point: the append expects the exact stream
//! version loaded in step 1, so of two racing commands on the same slot or
//! stock item, exactly one commits. The loser observes a `Concurrency` error
//! and can re-dispatch against the fresh stream (`dispatch_with_retry`).
//!
//! This module contains no IO itself; it composes the `EventStore` and
//! `EventBus` traits, so in-memory and Postgres deployments share one
//! execution model.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use labtrack_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, LabId};
use labtrack_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Upper bound on dispatch attempts when retrying concurrency conflicts.
pub const MAX_DISPATCH_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale stream version or a lost append
    /// race). Retryable: reload and re-decide.
    Concurrency(String),
    /// Lab isolation violation (cross-lab or cross-aggregate stream mixing).
    LabIsolation(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// Domain state conflict (deterministic; e.g. approving a cancelled
    /// booking). Not retryable.
    Conflict(String),
    /// The requested window overlaps an active booking on the same slot.
    SlotTaken { conflicting_booking: Uuid },
    /// Consumption requested more stock than is on hand.
    InsufficientStock { requested: i64, available: i64 },
    /// Domain authorization failure.
    Unauthorized,
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::LabIsolation(msg) => DispatchError::LabIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::SlotTaken {
                conflicting_booking,
            } => DispatchError::SlotTaken {
                conflicting_booking,
            },
            DomainError::InsufficientStock {
                requested,
                available,
            } => DispatchError::InsufficientStock {
                requested,
                available,
            },
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

impl DispatchError {
    /// True only for the transient store-level race. Domain conflicts are
    /// deterministic and re-dispatching them cannot change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// The dispatcher sits between the application services and the
/// infrastructure layer (event store, event bus). It provides a consistent
/// execution model for all commands while keeping domain code pure.
///
/// ## Execution Guarantees
///
/// - **Atomicity**: events are persisted before publication (if append fails,
///   nothing is published)
/// - **Consistency**: lab isolation and optimistic concurrency are enforced
/// - **Isolation**: each command operates on a single aggregate stream
///
/// ## At-Least-Once Delivery
///
/// If publication fails after a successful append, the error is returned but
/// the events are already durable. Downstream projections deduplicate by
/// sequence number, so re-publication is safe.
///
/// ## Generic Parameters
///
/// - `S`: event store implementation
/// - `B`: event bus implementation
///
/// Tests run on `InMemoryEventStore` + `InMemoryEventBus`; production swaps
/// in `PostgresEventStore` without changing domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// 1. **Load**: retrieve all events for the aggregate from the store
    /// 2. **Validate**: check lab isolation and sequence ordering on the
    ///    loaded stream
    /// 3. **Rehydrate**: apply history to rebuild the aggregate's state
    /// 4. **Decide**: call `aggregate.handle(command)` (pure, no mutation)
    /// 5. **Persist**: append with `ExpectedVersion::Exact(loaded_version)`
    /// 6. **Publish**: publish committed events to the bus
    ///
    /// The `make_aggregate` closure builds a fresh, empty aggregate instance
    /// (e.g. `SlotSchedule::empty(id)`); the dispatcher never needs to know
    /// how aggregates are constructed.
    ///
    /// Returns the committed `StoredEvent`s with their assigned sequence
    /// numbers. A concurrent writer racing this dispatch surfaces as
    /// `DispatchError::Concurrency`; callers retry via
    /// [`dispatch_with_retry`](Self::dispatch_with_retry) or surface the
    /// conflict.
    pub fn dispatch<A>(
        &self,
        lab_id: LabId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(LabId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: labtrack_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (lab-scoped)
        let history = self.store.load_stream(lab_id, aggregate_id)?;
        validate_loaded_stream(lab_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(lab_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    lab_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Dispatch with bounded retry on optimistic concurrency conflicts.
    ///
    /// Each attempt reloads the stream, so the command is re-decided against
    /// the state the winning writer left behind. A reservation that loses the
    /// append race but whose window is still free simply commits on the next
    /// attempt; one whose window was taken by the winner now fails with
    /// `SlotTaken` instead. Deterministic failures (validation, conflicts,
    /// `SlotTaken`, `InsufficientStock`) are never retried.
    ///
    /// Gives up after [`MAX_DISPATCH_ATTEMPTS`] attempts and returns the last
    /// concurrency error.
    pub fn dispatch_with_retry<A>(
        &self,
        lab_id: LabId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        mut make_aggregate: impl FnMut(LabId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: labtrack_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();
        let mut attempt = 1u32;

        loop {
            match self.dispatch(
                lab_id,
                aggregate_id,
                aggregate_type.clone(),
                command.clone(),
                &mut make_aggregate,
            ) {
                Err(err) if err.is_retryable() && attempt < MAX_DISPATCH_ATTEMPTS => {
                    tracing::debug!(
                        attempt,
                        aggregate_id = %aggregate_id.as_uuid(),
                        error = ?err,
                        "retrying command after concurrency conflict"
                    );
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    lab_id: LabId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // The loaded stream must be single-lab, single-aggregate, and strictly
    // increasing by sequence number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.lab_id != lab_id {
            return Err(DispatchError::LabIsolation(format!(
                "loaded stream contains wrong lab_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::LabIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
