//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an organization (multi-tenant boundary).
///
/// Every persisted row carries one; all queries filter by it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(Uuid);

impl OrganizationId {
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

impl Default for OrganizationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for OrganizationId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<OrganizationId> for Uuid {
    fn from(value: OrganizationId) -> Self {
        value.0
    }
}

impl FromStr for OrganizationId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("OrganizationId: {}", e)))?;
        Ok(Self(uuid))
    }
}

/// Position of an event in the outbox log.
///
/// Assigned by the event log on insert, strictly increasing per store (and
/// therefore per organization). Used for cursor comparisons and as the
/// tie-breaker in claim ordering.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for EventId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<EventId> for i64 {
    fn from(value: EventId) -> Self {
        value.0
    }
}

/// Name of a processor kind (e.g. "realtime-fanout", "audit-export").
///
/// Each processor kind tracks its own cursor per organization, so independent
/// consumers can walk the same log without coordinating with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessorName(String);

impl ProcessorName {
    /// Create a processor name. Must be non-empty.
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("processor name must be non-empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ProcessorName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organization_id_roundtrips_through_str() {
        let id = OrganizationId::new();
        let parsed: OrganizationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_organization_id_is_rejected() {
        let result: Result<OrganizationId, _> = "not-a-uuid".parse();
        assert!(result.is_err());
    }

    #[test]
    fn event_ids_order_by_value() {
        assert!(EventId::new(1) < EventId::new(2));
        assert_eq!(EventId::new(7).value(), 7);
    }

    #[test]
    fn processor_name_rejects_empty() {
        assert!(ProcessorName::new("").is_err());
        assert!(ProcessorName::new("  ").is_err());
        assert!(ProcessorName::new("realtime-fanout").is_ok());
    }
}
