//! Postgres-backed event store implementation.
//!
//! Persists event streams in PostgreSQL with lab isolation, optimistic
//! concurrency control and append-only semantics enforced at the database
//! level.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `EventStoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Concurrent append detected (unique constraint on sequence_number) |
//! | Database (check constraint violation) | `23514` | `InvalidAppend` | Invalid data (e.g., sequence_number <= 0) |
//! | Database (other) | Any other | `InvalidAppend` | Other database errors |
//! | PoolClosed / RowNotFound / Other | N/A | `InvalidAppend` | Connection failures, unexpected states |
//!
//! ## Thread Safety
//!
//! `PostgresEventStore` is `Send + Sync` and can be shared across threads.
//! All operations go through the SQLx connection pool.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{instrument, Span};

use labtrack_core::{AggregateId, ExpectedVersion, LabId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Postgres-backed append-only event store.
///
/// ## Lab Isolation
///
/// Every query includes `lab_id` in the WHERE clause, so events from another
/// lab can never be loaded or modified through this store. The schema also
/// supports Row-Level Security as an additional layer.
///
/// ## Optimistic Concurrency
///
/// `append_events()` runs in a transaction:
/// 1. Read the current stream version (MAX(sequence_number))
/// 2. Validate it matches `expected_version`
/// 3. Insert the new events
///
/// If another transaction commits between steps 1 and 3, the unique
/// constraint on `(lab_id, aggregate_id, sequence_number)` makes the insert
/// fail, which surfaces as a concurrency error. Slot double-booking and stock
/// double-spend both die on this constraint.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    /// Create a new PostgresEventStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Load all events for a lab + aggregate stream.
    ///
    /// Events are returned in sequence number order (ascending).
    /// Returns an empty vector if the stream doesn't exist.
    #[instrument(
        skip(self),
        fields(
            lab_id = %lab_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid()
        ),
        err
    )]
    pub async fn load_stream(
        &self,
        lab_id: LabId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let span = Span::current();
        span.record("operation", "load_stream");

        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                lab_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload,
                created_at
            FROM events
            WHERE lab_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(lab_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let mut stored_events = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = StoredEventRow::from_row(&row)
                .map_err(|e| EventStoreError::InvalidAppend(format!("failed to deserialize event row: {}", e)))?;
            stored_events.push(stored.into());
        }

        span.record("event_count", stored_events.len());
        Ok(stored_events)
    }

    /// Append events to a stream with optimistic concurrency control.
    ///
    /// Runs the version check and the inserts as one transaction. If the
    /// version check fails, or another transaction inserts events
    /// concurrently, returns `EventStoreError::Concurrency`.
    #[instrument(
        skip(self, events),
        fields(
            lab_id = %lab_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid(),
            event_count = events.len(),
            expected_version = ?expected_version
        ),
        err
    )]
    pub async fn append_events(
        &self,
        lab_id: LabId,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let span = Span::current();
        span.record("operation", "append_events");

        // Validate all events target the same lab + aggregate.
        for (idx, e) in events.iter().enumerate() {
            if e.lab_id != lab_id {
                return Err(EventStoreError::LabIsolation(format!(
                    "batch contains multiple lab_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
        }

        let aggregate_type = events[0].aggregate_type.clone();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (current_version, existing_aggregate_type) =
            check_stream_version(&mut tx, lab_id, aggregate_id).await?;

        // Enforce aggregate type stability across the stream.
        if let Some(ref existing_type) = existing_aggregate_type {
            if existing_type != &aggregate_type {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing_type, aggregate_type
                )));
            }
        }

        if !expected_version.matches(current_version) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::Concurrency(format!(
                "optimistic concurrency check failed: expected {:?}, found {}",
                expected_version, current_version
            )));
        }

        // Insert events with sequence numbers starting at current_version + 1.
        let mut stored_events = Vec::with_capacity(events.len());
        let mut next_sequence = current_version + 1;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id,
                    lab_id,
                    aggregate_id,
                    aggregate_type,
                    sequence_number,
                    event_type,
                    event_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.event_id)
            .bind(lab_id.as_uuid())
            .bind(aggregate_id.as_uuid())
            .bind(&aggregate_type)
            .bind(next_sequence as i64)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // A unique violation here means another transaction appended
                // to this stream after our version check.
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "concurrent append detected: sequence_number {} already exists",
                        next_sequence
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            let stored = StoredEvent {
                event_id: event.event_id,
                lab_id: event.lab_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                sequence_number: next_sequence,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            };
            stored_events.push(stored);
            next_sequence += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        span.record("committed_events", stored_events.len());
        Ok(stored_events)
    }
}

/// Check the current version of a stream.
///
/// Returns `(current_version, aggregate_type)` where `current_version` is 0
/// and `aggregate_type` is `None` when the stream doesn't exist.
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    lab_id: LabId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) as current_version,
            MAX(aggregate_type) as aggregate_type
        FROM events
        WHERE lab_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(lab_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: Option<i64> = row.try_get("current_version")
        .map_err(|e| EventStoreError::InvalidAppend(format!("failed to read current_version: {}", e)))?;
    let aggregate_type: Option<String> = row.try_get("aggregate_type")
        .map_err(|e| EventStoreError::InvalidAppend(format!("failed to read aggregate_type: {}", e)))?;

    Ok((current_version.unwrap_or(0) as u64, aggregate_type))
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    // Unique violation: concurrent append won the race.
                    "23505" => EventStoreError::Concurrency(msg),
                    _ => EventStoreError::InvalidAppend(msg),
                }
            } else {
                EventStoreError::InvalidAppend(msg)
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::InvalidAppend(format!("connection pool closed in {}", operation))
        }
        _ => EventStoreError::InvalidAppend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct StoredEventRow {
    event_id: uuid::Uuid,
    lab_id: uuid::Uuid,
    aggregate_id: uuid::Uuid,
    aggregate_type: String,
    sequence_number: i64,
    event_type: String,
    event_version: i32,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
    #[allow(dead_code)] // Read but not surfaced; kept for monitoring queries.
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            event_id: row.try_get("event_id")?,
            lab_id: row.try_get("lab_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.event_id,
            lab_id: LabId::from_uuid(row.lab_id),
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            sequence_number: row.sequence_number as u64,
            event_type: row.event_type,
            event_version: row.event_version as u32,
            occurred_at: row.occurred_at,
            payload: row.payload,
        }
    }
}

// The EventStore trait is synchronous; Postgres operations are async. We use
// the ambient tokio runtime handle to bridge, which works when called from
// within a tokio runtime context.

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| EventStoreError::InvalidAppend(
                "PostgresEventStore requires an async runtime (tokio); call from within a tokio runtime context".to_string()
            ))?;

        if events.is_empty() {
            return Ok(vec![]);
        }

        let lab_id = events[0].lab_id;
        let aggregate_id = events[0].aggregate_id;

        handle.block_on(self.append_events(lab_id, aggregate_id, events, expected_version))
    }

    fn load_stream(
        &self,
        lab_id: LabId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| EventStoreError::InvalidAppend(
                "PostgresEventStore requires an async runtime (tokio); call from within a tokio runtime context".to_string()
            ))?;

        handle.block_on(self.load_stream(lab_id, aggregate_id))
    }
}
