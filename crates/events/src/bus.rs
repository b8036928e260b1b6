//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the transport layer for events *after* they have been persisted
//! to the event store:
//!
//! ```text
//! Command → Event Store (append) → Event Bus (publish) → Consumers
//!                                                          ├─ projections
//!                                                          └─ logbook/notifications
//! ```
//!
//! Delivery is **at-least-once**: a consumer may see an envelope more than
//! once and must be idempotent. The bus never stores anything; the event
//! store is the source of truth and consumers can always be rebuilt from it.
//! This is what makes the audit logbook fire-and-forget: a consumer failure
//! never affects the already-committed booking or stock change.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every message published after it
/// subscribed (broadcast semantics). Subscriptions are consumed from a single
/// thread; spawn one worker per subscription.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// `publish()` can fail; failures surface to the caller (typically the
/// command dispatcher), which already persisted the events, so retrying
/// publication is safe. Implementations must be shareable across threads.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
