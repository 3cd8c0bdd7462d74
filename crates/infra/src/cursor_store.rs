//! Cursor persistence.
//!
//! Cursors are watermarks, not claims: a processor records the highest event
//! id it has durably handled per organization, and the sole write path is a
//! monotonic-max upsert. A stale writer can therefore never drag a cursor
//! backwards, no matter how delayed its write arrives.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;

use relaybox_core::{EventId, OrganizationId, ProcessorName};
use relaybox_outbox::ProcessorCursor;

use crate::outbox_store::OutboxStoreError;

/// Persistence seam for processor cursors.
#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    /// Fetch the cursor for one processor/organization pair, if it exists.
    async fn get(
        &self,
        processor: &ProcessorName,
        organization_id: OrganizationId,
    ) -> Result<Option<ProcessorCursor>, OutboxStoreError>;

    /// Monotonic-max upsert: move the watermark to `candidate` only if it is
    /// ahead of the stored value. Returns `true` if the cursor moved.
    async fn advance(
        &self,
        processor: &ProcessorName,
        organization_id: OrganizationId,
        candidate: EventId,
    ) -> Result<bool, OutboxStoreError>;
}

#[async_trait::async_trait]
impl<C: CursorStore + ?Sized> CursorStore for Arc<C> {
    async fn get(
        &self,
        processor: &ProcessorName,
        organization_id: OrganizationId,
    ) -> Result<Option<ProcessorCursor>, OutboxStoreError> {
        (**self).get(processor, organization_id).await
    }

    async fn advance(
        &self,
        processor: &ProcessorName,
        organization_id: OrganizationId,
        candidate: EventId,
    ) -> Result<bool, OutboxStoreError> {
        (**self).advance(processor, organization_id, candidate).await
    }
}

/// In-memory cursor store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<(ProcessorName, OrganizationId), ProcessorCursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(
        &self,
        processor: &ProcessorName,
        organization_id: OrganizationId,
    ) -> Result<Option<ProcessorCursor>, OutboxStoreError> {
        let cursors = self.cursors.read().await;
        Ok(cursors.get(&(processor.clone(), organization_id)).cloned())
    }

    async fn advance(
        &self,
        processor: &ProcessorName,
        organization_id: OrganizationId,
        candidate: EventId,
    ) -> Result<bool, OutboxStoreError> {
        let mut cursors = self.cursors.write().await;
        let now = Utc::now();
        match cursors.entry((processor.clone(), organization_id)) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                Ok(entry.get_mut().advance(candidate, now))
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(ProcessorCursor::new(
                    processor.clone(),
                    organization_id,
                    candidate,
                    now,
                ));
                Ok(true)
            }
        }
    }
}

/// Postgres cursor store.
///
/// The monotonic-max invariant is enforced in SQL, so it holds even across
/// processes racing on the same key.
#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pool: Arc<PgPool>,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl CursorStore for PostgresCursorStore {
    async fn get(
        &self,
        processor: &ProcessorName,
        organization_id: OrganizationId,
    ) -> Result<Option<ProcessorCursor>, OutboxStoreError> {
        let row: Option<(i64, chrono::DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT last_event_id, updated_at
            FROM processor_cursors
            WHERE processor_name = $1 AND organization_id = $2
            "#,
        )
        .bind(processor.as_str())
        .bind(organization_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| OutboxStoreError::Storage(format!("cursor get failed: {}", e)))?;

        Ok(row.map(|(last_event_id, updated_at)| {
            ProcessorCursor::new(
                processor.clone(),
                organization_id,
                EventId::new(last_event_id),
                updated_at,
            )
        }))
    }

    async fn advance(
        &self,
        processor: &ProcessorName,
        organization_id: OrganizationId,
        candidate: EventId,
    ) -> Result<bool, OutboxStoreError> {
        // The conditional DO UPDATE returns a row only when the watermark
        // actually moved, so fetch_optional doubles as the moved flag.
        let moved: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO processor_cursors (processor_name, organization_id, last_event_id, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (processor_name, organization_id) DO UPDATE
            SET last_event_id = EXCLUDED.last_event_id,
                updated_at = now()
            WHERE processor_cursors.last_event_id < EXCLUDED.last_event_id
            RETURNING last_event_id
            "#,
        )
        .bind(processor.as_str())
        .bind(organization_id.as_uuid())
        .bind(candidate.value())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| OutboxStoreError::Storage(format!("cursor advance failed: {}", e)))?;

        Ok(moved.is_some())
    }
}
