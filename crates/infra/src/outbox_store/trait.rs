//! Outbox store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use relaybox_core::{DomainError, EventId, OrganizationId};
use relaybox_outbox::{DeadLetterEvent, NewOutboxEvent, OutboxEvent};

/// Outcome of a claim attempt for one organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Another dispatcher instance holds the tenant lock; not an error, just
    /// skip this organization for this cycle.
    Skipped,
    /// The claimed batch, oldest first. May be empty.
    Claimed(Vec<OutboxEvent>),
}

/// Outbox store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OutboxStoreError {
    #[error("event not found: {0}")]
    NotFound(EventId),
    #[error("organization isolation violation")]
    TenantIsolation,
    #[error("validation failed: {0}")]
    Validation(#[from] DomainError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Per-organization log statistics (health surface).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct OutboxStats {
    pub pending: usize,
    pub delivered: usize,
    pub dead_lettered: usize,
    /// Age of the oldest undelivered event, if any.
    pub oldest_pending_age_secs: Option<i64>,
    /// Mean creation-to-delivery latency over delivered rows not yet pruned.
    pub avg_delivery_latency_ms: Option<i64>,
}

/// Storage contract for the event log, dead-letter store, and claim
/// coordination.
///
/// ## Tenant Isolation
///
/// Every operation that touches rows takes an `OrganizationId` and must never
/// read or mutate rows belonging to a different organization. Implementations
/// return [`OutboxStoreError::TenantIsolation`] when a caller addresses a row
/// through the wrong organization.
///
/// ## Claim semantics
///
/// `claim_batch` is atomic: selecting the batch and taking claim leases
/// happen in one store transaction, guarded by a tenant-keyed advisory lock
/// that is released before the method returns on every path. The lease
/// (`claimed_until`), not the lock, is what keeps two dispatcher instances
/// from double-processing across the attempt window, and it expires on its
/// own if an invocation crashes mid-batch.
///
/// Claiming does not touch `delivery_attempts`: the counter moves when an
/// outcome is recorded (`mark_delivered`, `record_failure`,
/// `move_to_dead_letter`), so claimed-but-never-offered events keep their
/// full attempt allowance.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Append a new event to the log. Writer contract for stores without an
    /// ambient transaction; the Postgres store additionally exposes a
    /// transaction-scoped `enqueue` for business writers.
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<EventId, OutboxStoreError>;

    /// Fetch one event by id, scoped to its organization.
    async fn get(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<Option<OutboxEvent>, OutboxStoreError>;

    /// Organizations that currently have claimable events, oldest work first.
    async fn pending_organizations(
        &self,
        limit: usize,
    ) -> Result<Vec<OrganizationId>, OutboxStoreError>;

    /// Claim up to `limit` of the oldest claimable events for one
    /// organization, ordered by `created_at` then `event_id`.
    async fn claim_batch(
        &self,
        organization_id: OrganizationId,
        limit: usize,
        lease: Duration,
    ) -> Result<ClaimOutcome, OutboxStoreError>;

    /// Record confirmed delivery. Sets `delivered_at` exactly once.
    async fn mark_delivered(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<(), OutboxStoreError>;

    /// Record a retryable failure and the time the claim query may offer the
    /// event again.
    async fn record_failure(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
        reason: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError>;

    /// Move an event to the dead-letter store. The active row is removed in
    /// the same operation, so the claim query never sees the event again.
    async fn move_to_dead_letter(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
        reason: &str,
    ) -> Result<(), OutboxStoreError>;

    /// List dead-lettered events for an organization, oldest failure first.
    async fn list_dead_letters(
        &self,
        organization_id: OrganizationId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEvent>, OutboxStoreError>;

    /// Operational recovery: move a dead-lettered event back to the active
    /// log with a fresh attempt counter.
    async fn requeue_dead_letter(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<OutboxEvent, OutboxStoreError>;

    /// Operational cleanup: drop a dead-lettered event for good.
    async fn delete_dead_letter(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<(), OutboxStoreError>;

    /// Highest event id in the log for an organization (cursor lag).
    async fn latest_event_id(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<EventId>, OutboxStoreError>;

    /// Delete up to `batch` delivered events older than `cutoff`, across all
    /// organizations. Never touches a row with `delivered_at` unset.
    async fn prune_delivered(
        &self,
        cutoff: DateTime<Utc>,
        batch: usize,
    ) -> Result<u64, OutboxStoreError>;

    /// Per-organization statistics for the health surface.
    async fn stats(
        &self,
        organization_id: OrganizationId,
    ) -> Result<OutboxStats, OutboxStoreError>;
}

#[async_trait]
impl<S> OutboxStore for std::sync::Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<EventId, OutboxStoreError> {
        (**self).enqueue(event).await
    }

    async fn get(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        (**self).get(organization_id, event_id).await
    }

    async fn pending_organizations(
        &self,
        limit: usize,
    ) -> Result<Vec<OrganizationId>, OutboxStoreError> {
        (**self).pending_organizations(limit).await
    }

    async fn claim_batch(
        &self,
        organization_id: OrganizationId,
        limit: usize,
        lease: Duration,
    ) -> Result<ClaimOutcome, OutboxStoreError> {
        (**self).claim_batch(organization_id, limit, lease).await
    }

    async fn mark_delivered(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<(), OutboxStoreError> {
        (**self).mark_delivered(organization_id, event_id).await
    }

    async fn record_failure(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
        reason: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        (**self)
            .record_failure(organization_id, event_id, reason, next_attempt_at)
            .await
    }

    async fn move_to_dead_letter(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
        reason: &str,
    ) -> Result<(), OutboxStoreError> {
        (**self)
            .move_to_dead_letter(organization_id, event_id, reason)
            .await
    }

    async fn list_dead_letters(
        &self,
        organization_id: OrganizationId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEvent>, OutboxStoreError> {
        (**self).list_dead_letters(organization_id, limit).await
    }

    async fn requeue_dead_letter(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<OutboxEvent, OutboxStoreError> {
        (**self).requeue_dead_letter(organization_id, event_id).await
    }

    async fn delete_dead_letter(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<(), OutboxStoreError> {
        (**self).delete_dead_letter(organization_id, event_id).await
    }

    async fn latest_event_id(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<EventId>, OutboxStoreError> {
        (**self).latest_event_id(organization_id).await
    }

    async fn prune_delivered(
        &self,
        cutoff: DateTime<Utc>,
        batch: usize,
    ) -> Result<u64, OutboxStoreError> {
        (**self).prune_delivered(cutoff, batch).await
    }

    async fn stats(
        &self,
        organization_id: OrganizationId,
    ) -> Result<OutboxStats, OutboxStoreError> {
        (**self).stats(organization_id).await
    }
}
