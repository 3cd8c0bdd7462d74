//! Terminal home for events that could not be delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::OutboxEvent;

/// A copy of an outbox event that exhausted its retries or was rejected as
/// undeliverable.
///
/// Dead-lettered events are never auto-retried; the active row is removed
/// when the copy is made, so the claim query never sees the event again.
/// Recovery is an explicit operational action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    pub event: OutboxEvent,
    pub failed_at: DateTime<Utc>,
    pub failure_reason: String,
    pub attempts_at_failure: u32,
}

impl DeadLetterEvent {
    /// Dead-lettering is itself the outcome of a failed offer, so the
    /// terminal attempt is counted here; `attempts_at_failure` includes it.
    pub fn new(
        mut event: OutboxEvent,
        failure_reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        event.delivery_attempts += 1;
        let attempts_at_failure = event.delivery_attempts;
        Self {
            event,
            failed_at: now,
            failure_reason: failure_reason.into(),
            attempts_at_failure,
        }
    }
}
