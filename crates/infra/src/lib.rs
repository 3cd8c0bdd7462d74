//! Infrastructure layer: outbox storage, dispatch, pruning, health.

pub mod cursor_store;
pub mod dispatcher;
pub mod health;
pub mod outbox_store;
pub mod pruner;

#[cfg(test)]
mod integration_tests;

pub use cursor_store::{CursorStore, InMemoryCursorStore, PostgresCursorStore};
pub use dispatcher::{DispatchError, DispatchReport, Dispatcher, DispatcherConfig};
pub use health::{health_snapshot, HealthSnapshot};
pub use outbox_store::{
    ClaimOutcome, InMemoryOutboxStore, OutboxStats, OutboxStore, OutboxStoreError,
    PostgresOutboxStore,
};
pub use pruner::{PruneReport, Pruner, PrunerConfig};
