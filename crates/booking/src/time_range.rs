use serde::{Deserialize, Serialize};

use labtrack_core::{DomainError, DomainResult, ValueObject};

/// Minutes in one calendar day; ranges never cross midnight.
pub const MINUTES_PER_DAY: u16 = 1440;

/// Half-open time-of-day window in minutes since midnight.
///
/// `start` is inclusive, `end` exclusive, so back-to-back bookings such as
/// 09:00-10:00 and 10:00-11:00 share a boundary minute without overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: u16,
    end: u16,
}

impl TimeRange {
    /// Build a validated range. `start` must precede `end` and `end` must
    /// stay within the day.
    pub fn new(start: u16, end: u16) -> DomainResult<Self> {
        if start >= end {
            return Err(DomainError::validation("start must be before end"));
        }
        if end > MINUTES_PER_DAY {
            return Err(DomainError::validation("end must not pass midnight"));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Two windows overlap iff each starts before the other ends.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end - self.start
    }
}

impl ValueObject for TimeRange {}

impl core::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}
