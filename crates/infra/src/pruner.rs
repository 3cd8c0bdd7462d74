//! Retention sweeper for delivered events.
//!
//! Only rows with a delivery timestamp older than the retention window are
//! eligible. Undelivered rows are never pruned, whatever their age; a stuck
//! event stays visible until it is delivered or dead-lettered.

use chrono::{Duration, Utc};
use tracing::{info, instrument};

use crate::outbox_store::{OutboxStore, OutboxStoreError};

#[derive(Debug, Clone)]
pub struct PrunerConfig {
    /// How long delivered events remain queryable.
    pub retention: Duration,
    /// Rows deleted per statement.
    pub batch_size: usize,
    /// Cap on batches per sweep, bounding one run's worth of delete traffic.
    pub max_batches: usize,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            retention: Duration::days(7),
            batch_size: 500,
            max_batches: 20,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PruneReport {
    pub pruned: u64,
    pub batches: usize,
    /// True when the sweep stopped at `max_batches` with rows likely left.
    pub truncated: bool,
}

pub struct Pruner<S> {
    store: S,
    config: PrunerConfig,
}

impl<S: OutboxStore> Pruner<S> {
    pub fn new(store: S, config: PrunerConfig) -> Self {
        Self { store, config }
    }

    /// Run one sweep: delete delivered rows past retention, in batches.
    #[instrument(skip(self), err)]
    pub async fn run_once(&self) -> Result<PruneReport, OutboxStoreError> {
        let cutoff = Utc::now() - self.config.retention;
        let mut report = PruneReport::default();

        while report.batches < self.config.max_batches {
            let removed = self
                .store
                .prune_delivered(cutoff, self.config.batch_size)
                .await?;
            if removed == 0 {
                break;
            }
            report.pruned += removed;
            report.batches += 1;
        }
        report.truncated = report.batches == self.config.max_batches;

        if report.pruned > 0 {
            info!(
                pruned = report.pruned,
                batches = report.batches,
                truncated = report.truncated,
                "prune sweep complete"
            );
        }
        Ok(report)
    }
}
