//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a lab (facility isolation boundary).
///
/// Every event stream and read model is scoped by a `LabId`; one deployment
/// can serve several laboratories without cross-contamination.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabId(Uuid);

/// Identifier of a user (actor identity, opaque to the core).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of an aggregate root.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(LabId, "LabId");
impl_uuid_newtype!(UserId, "UserId");
impl_uuid_newtype!(AggregateId, "AggregateId");

impl AggregateId {
    /// Derive a deterministic aggregate identifier from a namespace and a key.
    ///
    /// UUIDv5 over the namespace + key bytes: every process computes the same
    /// stream id for the same logical key without coordination. Used for slot
    /// streams keyed by (equipment, date).
    pub fn derived(namespace: &Uuid, key: &[u8]) -> Self {
        Self(Uuid::new_v5(namespace, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_stable() {
        let ns = Uuid::now_v7();
        let a = AggregateId::derived(&ns, b"equipment-a/2024-06-01");
        let b = AggregateId::derived(&ns, b"equipment-a/2024-06-01");
        let c = AggregateId::derived(&ns, b"equipment-a/2024-06-02");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ids_round_trip_through_display_and_parse() {
        let id = LabId::new();
        let parsed: LabId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<UserId>().unwrap_err();
        match err {
            DomainError::InvalidId(msg) => assert!(msg.contains("UserId")),
            _ => panic!("Expected InvalidId error"),
        }
    }
}
