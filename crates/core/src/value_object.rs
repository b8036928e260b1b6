//! Value object trait: equality by value, not identity.
//!
//! Value objects are defined entirely by their attribute values; two with the
//! same values are the same thing. They are immutable: "modifying" one means
//! constructing a new one.

/// Marker trait for value objects.
///
/// A `TimeRange { start: 540, end: 600 }` is a value object; a
/// `Booking { id: BookingId(...), .. }` is an entity.
///
/// The bounds keep value objects cheap to copy, comparable by value, and
/// debuggable.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
