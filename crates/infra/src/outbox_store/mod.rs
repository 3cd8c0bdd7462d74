//! Outbox event log storage.
//!
//! The relational store is the only coordination primitive in the pipeline:
//! claim leases, delivery state transitions, and tenant-scoped advisory locks
//! all live here. Dispatcher instances are stateless; everything they need to
//! resume after a crash is re-derived from this store.

mod in_memory;
mod postgres;
mod r#trait;

pub use in_memory::InMemoryOutboxStore;
pub use postgres::{run_migrations, PostgresOutboxStore};
pub use r#trait::{ClaimOutcome, OutboxStats, OutboxStore, OutboxStoreError};
