//! In-memory outbox store for tests/dev.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use relaybox_core::{EventId, OrganizationId};
use relaybox_outbox::{DeadLetterEvent, NewOutboxEvent, OutboxEvent};

use super::r#trait::{ClaimOutcome, OutboxStats, OutboxStore, OutboxStoreError};

#[derive(Debug, Default)]
struct Inner {
    events: BTreeMap<EventId, OutboxEvent>,
    dead_letters: BTreeMap<EventId, DeadLetterEvent>,
}

/// In-memory store mirroring the Postgres adapter's semantics: claim leases,
/// backoff gating, tenant isolation, and the dead-letter flow.
///
/// The tenant lock that Postgres provides via advisory locks is emulated with
/// a set of organizations currently inside `claim_batch`; a concurrent claim
/// for the same organization observes `ClaimOutcome::Skipped`, exactly like a
/// busy advisory lock.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    inner: RwLock<Inner>,
    next_event_id: AtomicI64,
    claims_in_flight: Mutex<HashSet<OrganizationId>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Hold the tenant lock open, as another dispatcher instance mid-claim
    /// would; claims for the organization observe `Skipped` until released.
    #[cfg(test)]
    pub(crate) fn hold_tenant_claim(&self, organization_id: OrganizationId) {
        self.claims_in_flight.lock().unwrap().insert(organization_id);
    }

    #[cfg(test)]
    pub(crate) fn release_tenant_claim(&self, organization_id: OrganizationId) {
        self.claims_in_flight
            .lock()
            .unwrap()
            .remove(&organization_id);
    }

    fn claim_locked(
        &self,
        organization_id: OrganizationId,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Vec<OutboxEvent> {
        let mut inner = self.inner.write().unwrap();

        // Creation order with event_id as tie-break is the delivery-order
        // guarantee within one organization.
        let mut batch: Vec<(DateTime<Utc>, EventId)> = inner
            .events
            .values()
            .filter(|e| e.organization_id == organization_id && e.is_claimable(now))
            .map(|e| (e.created_at, e.event_id))
            .collect();
        batch.sort();
        batch.truncate(limit);

        let mut claimed = Vec::with_capacity(batch.len());
        for (_, id) in batch {
            if let Some(event) = inner.events.get_mut(&id) {
                event.mark_claimed(now, lease);
                claimed.push(event.clone());
            }
        }
        claimed
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<EventId, OutboxStoreError> {
        event.validate()?;

        let event_id = EventId::new(self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1);
        let row = OutboxEvent {
            event_id,
            organization_id: event.organization_id,
            event_type: event.event_type,
            payload: event.payload,
            created_at: Utc::now(),
            delivered_at: None,
            delivery_attempts: 0,
            next_attempt_at: None,
            claimed_until: None,
            last_error: None,
        };

        let mut inner = self.inner.write().unwrap();
        inner.events.insert(event_id, row);
        Ok(event_id)
    }

    async fn get(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        let inner = self.inner.read().unwrap();
        match inner.events.get(&event_id) {
            Some(event) if event.organization_id == organization_id => Ok(Some(event.clone())),
            Some(_) => Err(OutboxStoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    async fn pending_organizations(
        &self,
        limit: usize,
    ) -> Result<Vec<OrganizationId>, OutboxStoreError> {
        let now = Utc::now();
        let inner = self.inner.read().unwrap();

        // Oldest claimable event per organization drives the ordering, so
        // starved tenants are visited first.
        let mut oldest: BTreeMap<(DateTime<Utc>, EventId), OrganizationId> = BTreeMap::new();
        let mut seen: HashSet<OrganizationId> = HashSet::new();
        for event in inner.events.values() {
            if event.is_claimable(now) && seen.insert(event.organization_id) {
                oldest.insert((event.created_at, event.event_id), event.organization_id);
            }
        }

        Ok(oldest.into_values().take(limit).collect())
    }

    async fn claim_batch(
        &self,
        organization_id: OrganizationId,
        limit: usize,
        lease: Duration,
    ) -> Result<ClaimOutcome, OutboxStoreError> {
        {
            let mut in_flight = self.claims_in_flight.lock().unwrap();
            if !in_flight.insert(organization_id) {
                return Ok(ClaimOutcome::Skipped);
            }
        }

        let claimed = self.claim_locked(organization_id, limit, lease, Utc::now());

        self.claims_in_flight
            .lock()
            .unwrap()
            .remove(&organization_id);

        Ok(ClaimOutcome::Claimed(claimed))
    }

    async fn mark_delivered(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<(), OutboxStoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner.events.get_mut(&event_id) {
            Some(event) if event.organization_id == organization_id => {
                event.mark_delivered(Utc::now());
                Ok(())
            }
            Some(_) => Err(OutboxStoreError::TenantIsolation),
            None => Err(OutboxStoreError::NotFound(event_id)),
        }
    }

    async fn record_failure(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
        reason: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner.events.get_mut(&event_id) {
            Some(event) if event.organization_id == organization_id => {
                event.record_failure(reason, next_attempt_at);
                Ok(())
            }
            Some(_) => Err(OutboxStoreError::TenantIsolation),
            None => Err(OutboxStoreError::NotFound(event_id)),
        }
    }

    async fn move_to_dead_letter(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
        reason: &str,
    ) -> Result<(), OutboxStoreError> {
        let mut inner = self.inner.write().unwrap();

        match inner.events.get(&event_id) {
            Some(event) if event.organization_id != organization_id => {
                return Err(OutboxStoreError::TenantIsolation);
            }
            Some(_) => {}
            None => return Err(OutboxStoreError::NotFound(event_id)),
        }

        if let Some(event) = inner.events.remove(&event_id) {
            inner
                .dead_letters
                .insert(event_id, DeadLetterEvent::new(event, reason, Utc::now()));
        }
        Ok(())
    }

    async fn list_dead_letters(
        &self,
        organization_id: OrganizationId,
        limit: usize,
    ) -> Result<Vec<DeadLetterEvent>, OutboxStoreError> {
        let inner = self.inner.read().unwrap();
        let mut entries: Vec<_> = inner
            .dead_letters
            .values()
            .filter(|e| e.event.organization_id == organization_id)
            .cloned()
            .collect();

        entries.sort_by_key(|e| e.failed_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn requeue_dead_letter(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<OutboxEvent, OutboxStoreError> {
        let mut inner = self.inner.write().unwrap();

        let entry = inner
            .dead_letters
            .remove(&event_id)
            .ok_or(OutboxStoreError::NotFound(event_id))?;

        if entry.event.organization_id != organization_id {
            // Put it back
            inner.dead_letters.insert(event_id, entry);
            return Err(OutboxStoreError::TenantIsolation);
        }

        let mut event = entry.event;
        event.delivery_attempts = 0;
        event.next_attempt_at = None;
        event.claimed_until = None;
        event.last_error = None;

        inner.events.insert(event_id, event.clone());
        Ok(event)
    }

    async fn delete_dead_letter(
        &self,
        organization_id: OrganizationId,
        event_id: EventId,
    ) -> Result<(), OutboxStoreError> {
        let mut inner = self.inner.write().unwrap();

        let entry = inner
            .dead_letters
            .get(&event_id)
            .ok_or(OutboxStoreError::NotFound(event_id))?;

        if entry.event.organization_id != organization_id {
            return Err(OutboxStoreError::TenantIsolation);
        }

        inner.dead_letters.remove(&event_id);
        Ok(())
    }

    async fn latest_event_id(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<EventId>, OutboxStoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .events
            .values()
            .filter(|e| e.organization_id == organization_id)
            .map(|e| e.event_id)
            .max())
    }

    async fn prune_delivered(
        &self,
        cutoff: DateTime<Utc>,
        batch: usize,
    ) -> Result<u64, OutboxStoreError> {
        let mut inner = self.inner.write().unwrap();

        let mut prunable: Vec<(DateTime<Utc>, EventId)> = inner
            .events
            .values()
            .filter_map(|e| {
                // Undelivered rows are never pruned, regardless of age.
                e.delivered_at
                    .filter(|at| *at < cutoff)
                    .map(|at| (at, e.event_id))
            })
            .collect();
        prunable.sort();
        prunable.truncate(batch);

        let deleted = prunable.len() as u64;
        for (_, id) in prunable {
            inner.events.remove(&id);
        }
        Ok(deleted)
    }

    async fn stats(
        &self,
        organization_id: OrganizationId,
    ) -> Result<OutboxStats, OutboxStoreError> {
        let now = Utc::now();
        let inner = self.inner.read().unwrap();

        let mut stats = OutboxStats::default();
        let mut oldest_pending: Option<DateTime<Utc>> = None;
        let mut latency_total_ms: i64 = 0;

        for event in inner.events.values() {
            if event.organization_id != organization_id {
                continue;
            }
            match event.delivered_at {
                Some(delivered_at) => {
                    stats.delivered += 1;
                    latency_total_ms += (delivered_at - event.created_at).num_milliseconds();
                }
                None => {
                    stats.pending += 1;
                    oldest_pending = match oldest_pending {
                        Some(at) if at <= event.created_at => Some(at),
                        _ => Some(event.created_at),
                    };
                }
            }
        }

        stats.dead_lettered = inner
            .dead_letters
            .values()
            .filter(|e| e.event.organization_id == organization_id)
            .count();
        stats.oldest_pending_age_secs = oldest_pending.map(|at| (now - at).num_seconds());
        stats.avg_delivery_latency_ms = if stats.delivered > 0 {
            Some(latency_total_ms / stats.delivered as i64)
        } else {
            None
        };

        Ok(stats)
    }
}
