//! Booking domain: equipment reservations with conflict detection.
//!
//! The aggregate here is the [`SlotSchedule`]: all bookings for one piece of
//! equipment on one calendar day. Keeping a whole day in a single stream makes
//! the reserve operation an ordinary command on one aggregate, so the event
//! store's optimistic version check is the only concurrency control needed to
//! guarantee no two overlapping bookings are ever both accepted.

pub mod schedule;
pub mod time_range;

pub use schedule::{
    AGGREGATE_TYPE, ApproveBooking, Booking, BookingApproved, BookingCancelled, BookingCompleted,
    BookingId, BookingRejected, BookingRequested, BookingStatus, CancelBooking, EndSession,
    RejectBooking, RequestBooking, ScheduleCommand, ScheduleEvent, ScheduleId, SessionEnded,
    SessionId, SessionStarted, SlotSchedule, StartSession, UsageSession,
};
pub use time_range::{MINUTES_PER_DAY, TimeRange};
