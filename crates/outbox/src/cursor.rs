//! Per-processor delivery progress (watermarks).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relaybox_core::{EventId, OrganizationId, ProcessorName};

/// High-water mark of events a processor kind has durably handled for one
/// organization.
///
/// The cursor stores a watermark, not a row reference: there is deliberately
/// no foreign key to the event log, so the bookmark survives after the pruner
/// removes the rows it describes. Each processor kind keeps its own cursor,
/// letting independent consumers (realtime fanout, audit export, analytics)
/// walk the same log without coordinating.
///
/// ## Invariant
///
/// `last_event_id` is monotonically non-decreasing per
/// `(processor_name, organization_id)` key. Concurrent writers must go
/// through a monotonic-max upsert, never a blind overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorCursor {
    pub processor_name: ProcessorName,
    pub organization_id: OrganizationId,
    pub last_event_id: EventId,
    pub updated_at: DateTime<Utc>,
}

impl ProcessorCursor {
    pub fn new(
        processor_name: ProcessorName,
        organization_id: OrganizationId,
        last_event_id: EventId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            processor_name,
            organization_id,
            last_event_id,
            updated_at: now,
        }
    }

    /// Advance the watermark; a stale candidate is ignored.
    ///
    /// Returns `true` if the cursor moved.
    pub fn advance(&mut self, candidate: EventId, now: DateTime<Utc>) -> bool {
        if candidate > self.last_event_id {
            self.last_event_id = candidate;
            self.updated_at = now;
            true
        } else {
            false
        }
    }
}
