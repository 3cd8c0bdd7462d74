//! `relaybox-outbox` — the outbox domain model.
//!
//! Types for the transactional outbox pipeline: the event rows themselves,
//! the retry/backoff policy that governs redelivery, the dead-letter terminal
//! state, per-processor cursors, and the broadcast contract implemented by
//! the real-time transport. Storage and scheduling live in `relaybox-infra`.

pub mod broadcast;
pub mod cursor;
pub mod dead_letter;
pub mod event;
pub mod retry;

pub use broadcast::{Broadcast, DeliveryOutcome};
pub use cursor::ProcessorCursor;
pub use dead_letter::DeadLetterEvent;
pub use event::{NewOutboxEvent, OutboxEvent};
pub use retry::{BackoffStrategy, RetryPolicy};
