use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{
        from_millis, parse_datetime, parse_optional_datetime, parse_sync_state, parse_uuid,
        to_i64, to_u32, to_u64,
    },
    models::{EnqueueOutcome, OutboxEntry},
};
use crate::models::{DistractionEvent, SyncState};

const OUTBOX_COLUMNS: &str = "event_id, session_id, revision, record_json, sync_state, \
     retry_count, next_attempt_ms, last_error, enqueued_at, synced_at";

fn row_to_entry(row: &Row) -> Result<OutboxEntry> {
    let record_json: String = row.get("record_json")?;
    let record: DistractionEvent =
        serde_json::from_str(&record_json).context("failed to decode outbox record")?;

    Ok(OutboxEntry {
        event_id: parse_uuid(&row.get::<_, String>("event_id")?, "event_id")?,
        session_id: parse_uuid(&row.get::<_, String>("session_id")?, "session_id")?,
        revision: to_u64(row.get("revision")?, "revision")?,
        record,
        sync_state: parse_sync_state(&row.get::<_, String>("sync_state")?)?,
        retry_count: to_u32(row.get("retry_count")?, "retry_count")?,
        next_attempt_at: from_millis(row.get("next_attempt_ms")?, "next_attempt_ms")?,
        last_error: row.get("last_error")?,
        enqueued_at: parse_datetime(&row.get::<_, String>("enqueued_at")?, "enqueued_at")?,
        synced_at: parse_optional_datetime(row.get("synced_at")?, "synced_at")?,
    })
}

impl Database {
    /// Idempotent per event id; see [`EnqueueOutcome`] for the cases.
    pub async fn enqueue_record(
        &self,
        record: &DistractionEvent,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        let record = record.clone();
        self.execute(move |conn| {
            let record_json =
                serde_json::to_string(&record).context("failed to encode outbox record")?;
            let event_id = record.id.to_string();
            let revision = to_i64(record.revision)?;

            let tx = conn.transaction()?;
            let existing: Option<(i64, String)> = tx
                .query_row(
                    "SELECT revision, sync_state FROM outbox WHERE event_id = ?1",
                    params![event_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let outcome = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO outbox (
                            event_id, session_id, revision, record_json, sync_state,
                            retry_count, next_attempt_ms, enqueued_at
                        ) VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6)",
                        params![
                            event_id,
                            record.session_id.to_string(),
                            revision,
                            record_json,
                            now.timestamp_millis(),
                            now.to_rfc3339(),
                        ],
                    )
                    .context("failed to insert outbox entry")?;
                    EnqueueOutcome::Inserted
                }
                Some((stored, state)) => match parse_sync_state(&state)? {
                    SyncState::Pending if revision >= stored => {
                        tx.execute(
                            "UPDATE outbox SET revision = ?1, record_json = ?2
                             WHERE event_id = ?3",
                            params![revision, record_json, event_id],
                        )
                        .context("failed to refresh outbox entry")?;
                        EnqueueOutcome::Refreshed
                    }
                    SyncState::Synced if revision > stored => {
                        tx.execute(
                            "UPDATE outbox
                             SET revision = ?1,
                                 record_json = ?2,
                                 sync_state = 'pending',
                                 retry_count = 0,
                                 next_attempt_ms = ?3,
                                 last_error = NULL,
                                 synced_at = NULL
                             WHERE event_id = ?4",
                            params![revision, record_json, now.timestamp_millis(), event_id],
                        )
                        .context("failed to reopen outbox entry")?;
                        EnqueueOutcome::Reopened
                    }
                    _ => EnqueueOutcome::Unchanged,
                },
            };

            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    /// Pending entries whose backoff has elapsed, oldest first.
    pub async fn due_entries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OUTBOX_COLUMNS} FROM outbox
                 WHERE sync_state = 'pending' AND next_attempt_ms <= ?1
                 ORDER BY next_attempt_ms ASC, enqueued_at ASC
                 LIMIT ?2"
            ))?;

            let mut rows = stmt.query(params![now.timestamp_millis(), limit])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }

    /// Marks an entry synced only if `revision` is still the stored one, so a
    /// newer payload enqueued mid-flight is delivered again.
    pub async fn mark_synced(
        &self,
        event_id: Uuid,
        revision: u64,
        synced_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE outbox
                     SET sync_state = 'synced', synced_at = ?1, last_error = NULL
                     WHERE event_id = ?2 AND revision = ?3 AND sync_state = 'pending'",
                    params![synced_at.to_rfc3339(), event_id.to_string(), to_i64(revision)?],
                )
                .context("failed to mark outbox entry synced")?;
            Ok(updated == 1)
        })
        .await
    }

    pub async fn record_failure(
        &self,
        event_id: Uuid,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let error = error.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE outbox
                 SET retry_count = ?1, next_attempt_ms = ?2, last_error = ?3
                 WHERE event_id = ?4 AND sync_state = 'pending'",
                params![
                    retry_count,
                    next_attempt_at.timestamp_millis(),
                    error,
                    event_id.to_string(),
                ],
            )
            .context("failed to record outbox failure")?;
            Ok(())
        })
        .await
    }

    /// Pending rows, across every session that shares this outbox file.
    pub async fn pending_count(&self) -> Result<usize> {
        self.execute(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM outbox WHERE sync_state = 'pending'",
                [],
                |row| row.get(0),
            )?;
            Ok(to_u64(count, "pending count")? as usize)
        })
        .await
    }

    /// Pending rows written by one session.
    pub async fn pending_count_for_session(&self, session_id: Uuid) -> Result<usize> {
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM outbox WHERE sync_state = 'pending' AND session_id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(to_u64(count, "pending count")? as usize)
        })
        .await
    }

    #[cfg(test)]
    pub(crate) async fn get_outbox_entry(&self, event_id: Uuid) -> Result<Option<OutboxEntry>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE event_id = ?1"
            ))?;
            let mut rows = stmt.query(params![event_id.to_string()])?;
            let entry = match rows.next()? {
                Some(row) => Some(row_to_entry(row)?),
                None => None,
            };
            Ok(entry)
        })
        .await
    }
}
