//! Outbox event rows and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relaybox_core::{DomainError, DomainResult, EventId, OrganizationId};

/// A state-change notification awaiting (or past) delivery.
///
/// Rows are created by the writer contract inside the business transaction
/// that produced the state change, mutated only by the dispatcher (attempts,
/// claim lease, `delivered_at`) or by migration to the dead-letter store,
/// and deleted only by the pruner once delivered and past retention.
///
/// ## Invariants
///
/// - `delivered_at` is set exactly once; a delivered row is never mutated again.
/// - `delivery_attempts` counts claim-and-attempt cycles, not successes.
/// - `organization_id` is present on every row; all access is scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Log position, assigned by the store. Monotonic per organization.
    pub event_id: EventId,
    /// Tenant boundary.
    pub organization_id: OrganizationId,
    /// Discriminator for the payload shape (e.g. "job.status_changed").
    pub event_type: String,
    /// Opaque structured document; the pipeline never inspects it.
    pub payload: serde_json::Value,
    /// Immutable creation timestamp; primary delivery-order key.
    pub created_at: DateTime<Utc>,
    /// Set once, only after the broadcast contract confirmed success.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Incremented on every claim-and-attempt cycle.
    pub delivery_attempts: u32,
    /// Backoff gate: the claim query skips the row until this has elapsed.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Claim lease: while in the future, another dispatcher invocation will
    /// not re-claim the row. Expires on its own if an invocation crashes.
    pub claimed_until: Option<DateTime<Utc>>,
    /// Most recent delivery failure, recorded on the row so the system state
    /// is queryable without log correlation.
    pub last_error: Option<String>,
}

impl OutboxEvent {
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    /// Whether the claim query may offer this row at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if self.delivered_at.is_some() {
            return false;
        }
        if let Some(at) = self.next_attempt_at {
            if now < at {
                return false;
            }
        }
        match self.claimed_until {
            Some(until) => until <= now,
            None => true,
        }
    }

    /// Take a claim lease.
    ///
    /// Claiming does not count an attempt: `delivery_attempts` moves only
    /// when an outcome is recorded, so a claim whose batch is cut short (an
    /// in-order stop behind a failing event, a crashed invocation) burns no
    /// attempts for the events that were never offered.
    pub fn mark_claimed(&mut self, now: DateTime<Utc>, lease: chrono::Duration) {
        self.claimed_until = Some(now + lease);
    }

    /// Record confirmed delivery, counting the successful attempt.
    ///
    /// Idempotent: a duplicate confirmation keeps the first timestamp and the
    /// first attempt count, so the at-least-once crash window (broadcast
    /// succeeded, persist raced) never rewinds `delivered_at`.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) {
        if self.delivered_at.is_none() {
            self.delivered_at = Some(now);
            self.delivery_attempts += 1;
        }
        self.claimed_until = None;
        self.next_attempt_at = None;
        self.last_error = None;
    }

    /// Record a retryable failure, counting the attempt, and schedule the
    /// next one.
    pub fn record_failure(&mut self, reason: impl Into<String>, next_attempt_at: DateTime<Utc>) {
        self.delivery_attempts += 1;
        self.last_error = Some(reason.into());
        self.next_attempt_at = Some(next_attempt_at);
        self.claimed_until = None;
    }
}

/// Input to the writer contract; everything else is assigned by the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub organization_id: OrganizationId,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn new(
        organization_id: OrganizationId,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            organization_id,
            event_type: event_type.into(),
            payload,
        }
    }

    /// Validate before insert. The insert shares the caller's business
    /// transaction, so a validation failure fails that transaction too.
    pub fn validate(&self) -> DomainResult<()> {
        if self.event_type.trim().is_empty() {
            return Err(DomainError::validation("event_type must be non-empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_event(now: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            event_id: EventId::new(1),
            organization_id: OrganizationId::new(),
            event_type: "job.status_changed".to_string(),
            payload: serde_json::json!({"status": "done"}),
            created_at: now,
            delivered_at: None,
            delivery_attempts: 0,
            next_attempt_at: None,
            claimed_until: None,
            last_error: None,
        }
    }

    #[test]
    fn fresh_event_is_claimable() {
        let now = Utc::now();
        let event = pending_event(now);
        assert!(event.is_claimable(now));
    }

    #[test]
    fn claim_takes_lease_without_counting_an_attempt() {
        let now = Utc::now();
        let mut event = pending_event(now);

        event.mark_claimed(now, chrono::Duration::seconds(30));
        assert_eq!(event.delivery_attempts, 0);
        assert!(!event.is_claimable(now));
        // Lease expires on its own after a crashed invocation.
        assert!(event.is_claimable(now + chrono::Duration::seconds(31)));
    }

    #[test]
    fn backoff_gate_blocks_claim_until_elapsed() {
        let now = Utc::now();
        let mut event = pending_event(now);
        event.record_failure("transport closed", now + chrono::Duration::seconds(10));

        assert!(!event.is_claimable(now));
        assert!(event.is_claimable(now + chrono::Duration::seconds(10)));
        assert_eq!(event.last_error.as_deref(), Some("transport closed"));
        assert_eq!(event.delivery_attempts, 1);
    }

    #[test]
    fn delivered_at_is_set_exactly_once() {
        let now = Utc::now();
        let mut event = pending_event(now);

        event.mark_delivered(now);
        let first = event.delivered_at;
        event.mark_delivered(now + chrono::Duration::seconds(5));

        assert_eq!(event.delivered_at, first);
        assert_eq!(event.delivery_attempts, 1);
        assert!(!event.is_claimable(now + chrono::Duration::seconds(6)));
    }

    #[test]
    fn new_event_requires_event_type() {
        let bad = NewOutboxEvent::new(OrganizationId::new(), "  ", serde_json::json!({}));
        assert!(bad.validate().is_err());

        let ok = NewOutboxEvent::new(
            OrganizationId::new(),
            "job.status_changed",
            serde_json::json!({}),
        );
        assert!(ok.validate().is_ok());
    }
}
