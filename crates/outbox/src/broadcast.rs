//! The broadcast contract (delivery transport seam).
//!
//! The pipeline never talks to subscribers directly; it hands each event to
//! an implementation of [`Broadcast`] (WebSocket fanout, webhook sender, an
//! in-memory recorder in tests) and acts on the three-way outcome.
//!
//! ## Delivery Guarantees
//!
//! The contract is **at-least-once**: a crash between "broadcast succeeded"
//! and "`delivered_at` persisted" re-offers the same event on the next cycle,
//! so consumers must tolerate duplicates of the same `event_id`.
//!
//! ## Outcome mapping
//!
//! Transport errors map to [`DeliveryOutcome`] variants rather than being
//! raised, so the retry policy can make a deterministic decision without
//! inspecting transport-specific error types. Panics inside a transport are
//! a bug in the transport, not a signaling mechanism.

use async_trait::async_trait;

use crate::event::OutboxEvent;

/// Result of offering one event to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The transport confirmed delivery.
    Delivered,
    /// Transient failure (connection dropped, subscriber slow); the event
    /// stays pending and is retried with backoff.
    Retryable(String),
    /// The event can never be delivered (malformed payload, permanently
    /// rejected); it is dead-lettered immediately, no retry.
    Permanent(String),
}

impl DeliveryOutcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Transport that pushes delivered events to subscribed clients.
///
/// Implementations must be safe to call concurrently for different
/// organizations. The dispatcher enforces a per-call timeout on top of this,
/// so a single slow tenant cannot stall a whole invocation; a timed-out call
/// is treated as retryable.
#[async_trait]
pub trait Broadcast: Send + Sync {
    async fn deliver(&self, event: &OutboxEvent) -> DeliveryOutcome;
}

#[async_trait]
impl<B> Broadcast for std::sync::Arc<B>
where
    B: Broadcast + ?Sized,
{
    async fn deliver(&self, event: &OutboxEvent) -> DeliveryOutcome {
        (**self).deliver(event).await
    }
}
