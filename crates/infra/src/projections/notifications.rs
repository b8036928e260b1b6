use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use labtrack_booking::{BookingId, ScheduleEvent, TimeRange};
use labtrack_core::{AggregateId, LabId, UserId};
use labtrack_events::EventEnvelope;

use crate::read_model::LabStore;

/// A notification queued for a lab member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Event id of the triggering event; doubles as the notification key.
    pub notification_id: Uuid,
    pub booking_id: BookingId,
    pub recipient: UserId,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

/// What we remember about a request so later decisions can address the
/// requester with the slot details.
#[derive(Debug, Clone, Copy)]
struct RequestFacts {
    requested_by: UserId,
    date: NaiveDate,
    range: TimeRange,
}

/// Lab+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    lab_id: LabId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum NotificationProjectionError {
    #[error("failed to deserialize schedule event: {0}")]
    Deserialize(String),

    #[error("lab isolation violation: {0}")]
    LabIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Notification projection: tells requesters about approval decisions.
///
/// Approval and rejection events only name the approver, so the projection
/// remembers who requested each booking (and for which window) from the
/// earlier `BookingRequested` event in the same stream. Notifications are
/// derived state; delivery to mail or chat is somebody else's job.
#[derive(Debug)]
pub struct NotificationProjection<S>
where
    S: LabStore<Uuid, Notification>,
{
    store: S,
    requesters: RwLock<HashMap<(LabId, BookingId), RequestFacts>>,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> NotificationProjection<S>
where
    S: LabStore<Uuid, Notification>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            requesters: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Notifications addressed to one lab member, oldest first.
    pub fn for_user(&self, lab_id: LabId, user: UserId) -> Vec<Notification> {
        let mut notifications: Vec<_> = self
            .store
            .list(lab_id)
            .into_iter()
            .filter(|n| n.recipient == user)
            .collect();
        notifications.sort_by_key(|n| (n.sent_at, *n.notification_id.as_bytes()));
        notifications
    }

    /// Apply a published envelope into the projection.
    ///
    /// Only booking schedule events are considered; everything else is
    /// skipped.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), NotificationProjectionError> {
        if envelope.aggregate_type() != labtrack_booking::AGGREGATE_TYPE {
            return Ok(());
        }

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
                return Err(NotificationProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(NotificationProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let event: ScheduleEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| NotificationProjectionError::Deserialize(e.to_string()))?;

            let (event_lab, schedule_id) = match &event {
                ScheduleEvent::BookingRequested(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::BookingApproved(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::BookingRejected(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::BookingCancelled(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::SessionStarted(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::SessionEnded(e) => (e.lab_id, e.schedule_id),
                ScheduleEvent::BookingCompleted(e) => (e.lab_id, e.schedule_id),
            };

            if event_lab != lab_id {
                return Err(NotificationProjectionError::LabIsolation(
                    "event lab_id does not match envelope lab_id".to_string(),
                ));
            }

            if schedule_id.0 != aggregate_id {
                return Err(NotificationProjectionError::LabIsolation(
                    "event schedule_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match event {
                ScheduleEvent::BookingRequested(e) => {
                    if let Ok(mut requesters) = self.requesters.write() {
                        requesters.insert(
                            (lab_id, e.booking_id),
                            RequestFacts {
                                requested_by: e.requested_by,
                                date: e.date,
                                range: e.range,
                            },
                        );
                    }
                }
                ScheduleEvent::BookingApproved(e) => {
                    if let Some(facts) = self.request_facts(lab_id, e.booking_id) {
                        self.push_notification(
                            lab_id,
                            envelope.event_id(),
                            e.booking_id,
                            facts.requested_by,
                            format!(
                                "your booking for {} {} was approved",
                                facts.date, facts.range
                            ),
                            e.occurred_at,
                        );
                    }
                }
                ScheduleEvent::BookingRejected(e) => {
                    if let Some(facts) = self.request_facts(lab_id, e.booking_id) {
                        let message = match &e.reason {
                            Some(reason) => format!(
                                "your booking for {} {} was rejected: {}",
                                facts.date, facts.range, reason
                            ),
                            None => format!(
                                "your booking for {} {} was rejected",
                                facts.date, facts.range
                            ),
                        };
                        self.push_notification(
                            lab_id,
                            envelope.event_id(),
                            e.booking_id,
                            facts.requested_by,
                            message,
                            e.occurred_at,
                        );
                    }
                }
                // Cancellations, sessions and completions notify nobody.
                _ => {}
            }

            // Advance cursor after successful apply.
            cursors.insert(key, seq);
        }

        Ok(())
    }

    fn request_facts(&self, lab_id: LabId, booking_id: BookingId) -> Option<RequestFacts> {
        let requesters = self.requesters.read().ok()?;
        requesters.get(&(lab_id, booking_id)).copied()
    }

    fn push_notification(
        &self,
        lab_id: LabId,
        event_id: Uuid,
        booking_id: BookingId,
        recipient: UserId,
        message: String,
        sent_at: DateTime<Utc>,
    ) {
        self.store.upsert(
            lab_id,
            event_id,
            Notification {
                notification_id: event_id,
                booking_id,
                recipient,
                message,
                sent_at,
            },
        );
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), NotificationProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        if let Ok(mut requesters) = self.requesters.write() {
            requesters.clear();
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
