use labtrack_core::LabId;

use crate::EventEnvelope;

/// Helper trait for lab-scoped messages.
///
/// Marks message types that carry a lab identifier, so subscriber loops can
/// be pinned to a single facility and ignore everything else.
/// `EventEnvelope` implements it.
pub trait LabScoped {
    fn lab_id(&self) -> LabId;
}

impl<E> LabScoped for EventEnvelope<E> {
    fn lab_id(&self) -> LabId {
        self.lab_id()
    }
}
