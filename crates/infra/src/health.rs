//! Operational snapshot of one organization's pipeline.

use serde::Serialize;

use relaybox_core::{OrganizationId, ProcessorName};

use crate::cursor_store::CursorStore;
use crate::outbox_store::{OutboxStats, OutboxStore, OutboxStoreError};

/// Point-in-time view for dashboards and alerting.
///
/// `cursor_lag` is the distance between the newest event in the log and the
/// processor's watermark. `None` means the organization has no events yet or
/// the processor has no cursor for it; event ids come from a store-wide
/// sequence, so subtracting from an assumed zero watermark would report a
/// wildly inflated lag for a new tenant. A persistently growing value means
/// the processor is falling behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub organization_id: OrganizationId,
    pub processor: ProcessorName,
    pub stats: OutboxStats,
    pub latest_event_id: Option<i64>,
    pub cursor_position: Option<i64>,
    pub cursor_lag: Option<i64>,
}

pub async fn health_snapshot<S, C>(
    store: &S,
    cursors: &C,
    processor: &ProcessorName,
    organization_id: OrganizationId,
) -> Result<HealthSnapshot, OutboxStoreError>
where
    S: OutboxStore,
    C: CursorStore,
{
    let stats = store.stats(organization_id).await?;
    let latest = store.latest_event_id(organization_id).await?;
    let cursor = cursors.get(processor, organization_id).await?;

    let latest_event_id = latest.map(|id| id.value());
    let cursor_position = cursor.map(|c| c.last_event_id.value());
    let cursor_lag = match (latest_event_id, cursor_position) {
        (Some(latest), Some(position)) => Some(latest - position),
        _ => None,
    };

    Ok(HealthSnapshot {
        organization_id,
        processor: processor.clone(),
        stats,
        latest_event_id,
        cursor_position,
        cursor_lag,
    })
}
