//! Entity trait: identity + continuity across state changes.
//!
//! Bookings and usage sessions are entities that live *inside* the slot
//! schedule aggregate; they carry their own ids but are only ever mutated
//! through the aggregate's events.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
