//! Claim / broadcast / settle loop.
//!
//! One [`Dispatcher::run_once`] call is a single bounded dispatch cycle:
//! discover organizations with claimable work, claim a batch per
//! organization, broadcast each event in creation order, and record the
//! outcome. The caller owns the outer loop and its cadence; `run_once` never
//! sleeps and never spins.
//!
//! Delivery is at-least-once. The claim lease, not the dispatcher process,
//! is the unit of exclusion: if the process dies mid-batch, the lease expires
//! and another instance reclaims the events.

use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use relaybox_core::{EventId, ProcessorName};
use relaybox_outbox::{Broadcast, DeliveryOutcome, OutboxEvent, RetryPolicy};

use crate::cursor_store::CursorStore;
use crate::outbox_store::{ClaimOutcome, OutboxStore, OutboxStoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("storage error during dispatch: {0}")]
    Store(#[from] OutboxStoreError),
}

/// Tuning knobs for one dispatcher instance.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Processor identity; keys the cursors this dispatcher advances.
    pub processor: ProcessorName,
    /// Maximum events claimed per organization per cycle.
    pub batch_size: usize,
    /// Maximum organizations visited per cycle.
    pub tenant_limit: usize,
    /// How long a claim shields events from other dispatchers.
    pub claim_lease: chrono::Duration,
    /// Upper bound on a single broadcast call; overrun counts as a
    /// retryable failure.
    pub broadcast_timeout: std::time::Duration,
    /// Wall-clock budget for the whole cycle; checked between organizations.
    pub run_budget: std::time::Duration,
    pub retry_policy: RetryPolicy,
}

impl DispatcherConfig {
    pub fn new(processor: ProcessorName) -> Self {
        Self {
            processor,
            batch_size: 50,
            tenant_limit: 10,
            claim_lease: chrono::Duration::seconds(30),
            broadcast_timeout: std::time::Duration::from_secs(10),
            run_budget: std::time::Duration::from_secs(5),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_tenant_limit(mut self, tenant_limit: usize) -> Self {
        self.tenant_limit = tenant_limit;
        self
    }

    pub fn with_claim_lease(mut self, lease: chrono::Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_broadcast_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }

    pub fn with_run_budget(mut self, budget: std::time::Duration) -> Self {
        self.run_budget = budget;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Counters for one dispatch cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub tenants_processed: usize,
    pub tenants_skipped: usize,
    pub budget_exhausted: bool,
}

pub struct Dispatcher<S, C, B> {
    store: S,
    cursors: C,
    broadcast: B,
    config: DispatcherConfig,
}

impl<S, C, B> Dispatcher<S, C, B>
where
    S: OutboxStore,
    C: CursorStore,
    B: Broadcast,
{
    pub fn new(store: S, cursors: C, broadcast: B, config: DispatcherConfig) -> Self {
        Self {
            store,
            cursors,
            broadcast,
            config,
        }
    }

    pub fn processor(&self) -> &ProcessorName {
        &self.config.processor
    }

    /// Run one bounded dispatch cycle.
    #[instrument(skip(self), fields(processor = %self.config.processor.as_str()), err)]
    pub async fn run_once(&self) -> Result<DispatchReport, DispatchError> {
        let started = Instant::now();
        let mut report = DispatchReport::default();

        let organizations = self
            .store
            .pending_organizations(self.config.tenant_limit)
            .await?;

        for organization_id in organizations {
            if started.elapsed() >= self.config.run_budget {
                report.budget_exhausted = true;
                break;
            }

            let batch = match self
                .store
                .claim_batch(organization_id, self.config.batch_size, self.config.claim_lease)
                .await?
            {
                ClaimOutcome::Skipped => {
                    debug!(organization_id = %organization_id, "organization busy, skipping cycle");
                    report.tenants_skipped += 1;
                    continue;
                }
                ClaimOutcome::Claimed(batch) => batch,
            };

            report.tenants_processed += 1;
            report.claimed += batch.len();

            let high_water = self.dispatch_batch(batch, &mut report).await?;
            if let Some(event_id) = high_water {
                self.cursors
                    .advance(&self.config.processor, organization_id, event_id)
                    .await?;
            }
        }

        info!(
            delivered = report.delivered,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            tenants = report.tenants_processed,
            budget_exhausted = report.budget_exhausted,
            "dispatch cycle complete"
        );
        Ok(report)
    }

    /// Broadcast one organization's batch in order.
    ///
    /// A retryable failure stops the batch so later events cannot overtake
    /// the failed one. A dead-lettered event no longer blocks its
    /// successors, so the batch continues past it.
    ///
    /// Returns the highest delivered event id, the cursor candidate.
    async fn dispatch_batch(
        &self,
        batch: Vec<OutboxEvent>,
        report: &mut DispatchReport,
    ) -> Result<Option<EventId>, DispatchError> {
        let mut high_water: Option<EventId> = None;

        for event in batch {
            let outcome = match tokio::time::timeout(
                self.config.broadcast_timeout,
                self.broadcast.deliver(&event),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => DeliveryOutcome::retryable(format!(
                    "broadcast exceeded {:?}",
                    self.config.broadcast_timeout
                )),
            };

            match outcome {
                DeliveryOutcome::Delivered => {
                    self.store
                        .mark_delivered(event.organization_id, event.event_id)
                        .await?;
                    report.delivered += 1;
                    high_water = Some(high_water.map_or(event.event_id, |h| h.max(event.event_id)));
                }
                DeliveryOutcome::Retryable(reason) => {
                    // Stored attempts count completed offers; this failing
                    // offer is attempt N+1.
                    let attempt = event.delivery_attempts + 1;
                    if self.config.retry_policy.should_retry(attempt) {
                        let next = self.config.retry_policy.next_attempt_at(attempt, Utc::now());
                        warn!(
                            organization_id = %event.organization_id,
                            event_id = %event.event_id,
                            attempt,
                            next_attempt_at = %next,
                            reason = %reason,
                            "delivery failed, scheduling retry"
                        );
                        self.store
                            .record_failure(event.organization_id, event.event_id, &reason, next)
                            .await?;
                        report.retried += 1;
                        break;
                    }
                    warn!(
                        organization_id = %event.organization_id,
                        event_id = %event.event_id,
                        attempt,
                        reason = %reason,
                        "retries exhausted, dead-lettering"
                    );
                    self.store
                        .move_to_dead_letter(event.organization_id, event.event_id, &reason)
                        .await?;
                    report.dead_lettered += 1;
                }
                DeliveryOutcome::Permanent(reason) => {
                    warn!(
                        organization_id = %event.organization_id,
                        event_id = %event.event_id,
                        reason = %reason,
                        "permanent delivery failure, dead-lettering"
                    );
                    self.store
                        .move_to_dead_letter(event.organization_id, event.event_id, &reason)
                        .await?;
                    report.dead_lettered += 1;
                }
            }
        }

        Ok(high_water)
    }
}
