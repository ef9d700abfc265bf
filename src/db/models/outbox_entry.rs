use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DistractionEvent, SyncState};

/// One outbox row: the newest record for an event and its delivery state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub event_id: Uuid,
    pub session_id: Uuid,
    pub revision: u64,
    pub record: DistractionEvent,
    pub sync_state: SyncState,
    pub retry_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// First time this id was seen.
    Inserted,
    /// Already pending; payload replaced, queue position and retries kept.
    Refreshed,
    /// Was synced at an older revision; pending again.
    Reopened,
    /// Stale or duplicate revision.
    Unchanged,
}
