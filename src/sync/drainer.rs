use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{
    coordinator::Feedback,
    db::{Database, EnqueueOutcome, OutboxEntry},
    error::EngineError,
    models::{DistractionEvent, SyncState},
    providers::RecordStore,
};

use super::backoff::BackoffPolicy;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const UPSERT_TIMEOUT_SECS: u64 = 15;
const BATCH_SIZE: usize = 32;

/// Moves records from the sync queue into the durable outbox and from the
/// outbox to the remote store.
pub struct SyncDrainer {
    db: Database,
    store: Arc<dyn RecordStore>,
    collection: String,
    policy: BackoffPolicy,
    poll_interval: Duration,
    feedback: mpsc::UnboundedSender<Feedback>,
    /// Records the outbox refused to persist; retried every tick.
    unpersisted: Vec<DistractionEvent>,
}

impl SyncDrainer {
    pub fn new(
        db: Database,
        store: Arc<dyn RecordStore>,
        collection: String,
        policy: BackoffPolicy,
        poll_interval: Duration,
        feedback: mpsc::UnboundedSender<Feedback>,
    ) -> Self {
        Self {
            db,
            store,
            collection,
            policy,
            poll_interval,
            feedback,
            unpersisted: Vec::new(),
        }
    }

    /// Runs until cancelled, or until drain mode is requested, the inbound
    /// queue has closed, and the outbox holds nothing pending.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<DistractionEvent>,
        cancel_token: CancellationToken,
        drain_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbound_open = true;

        loop {
            tokio::select! {
                maybe_record = inbound.recv(), if inbound_open => match maybe_record {
                    Some(record) => self.persist(record).await,
                    None => {
                        log_debug!("sync queue closed");
                        inbound_open = false;
                    }
                },
                _ = ticker.tick() => {
                    self.retry_unpersisted().await;
                    if !self.attempt_due(&cancel_token).await {
                        break;
                    }
                    if *drain_rx.borrow() && !inbound_open && self.is_empty().await {
                        log_info!("sync drainer finished draining");
                        break;
                    }
                }
                _ = cancel_token.cancelled() => {
                    log_info!("sync drainer shutting down");
                    break;
                }
            }
        }

        self.persist_remaining(&mut inbound).await;
    }

    /// Writes whatever is still queued in memory to the outbox so a
    /// cancelled drain leaves every record durable for the next session.
    async fn persist_remaining(&mut self, inbound: &mut mpsc::Receiver<DistractionEvent>) {
        inbound.close();
        let mut flushed = 0usize;
        while let Ok(record) = inbound.try_recv() {
            self.persist(record).await;
            flushed += 1;
        }
        self.retry_unpersisted().await;

        if flushed > 0 {
            log_info!("persisted {flushed} queued records before exiting");
        }
        if !self.unpersisted.is_empty() {
            log_error!(
                "{} records could not be written to the outbox",
                self.unpersisted.len()
            );
        }
    }

    async fn is_empty(&self) -> bool {
        if !self.unpersisted.is_empty() {
            return false;
        }
        match self.db.pending_count().await {
            Ok(count) => count == 0,
            Err(err) => {
                log_error!("failed to count pending outbox rows: {err:#}");
                false
            }
        }
    }

    async fn persist(&mut self, record: DistractionEvent) {
        match self.db.enqueue_record(&record, Utc::now()).await {
            Ok(EnqueueOutcome::Unchanged) => {
                log_debug!("outbox already holds revision {} of {}", record.revision, record.id);
            }
            Ok(outcome) => {
                log_debug!("outbox {:?} {} (revision {})", outcome, record.id, record.revision);
            }
            Err(err) => {
                log_error!("failed to persist {} to outbox: {err:#}", record.id);
                self.unpersisted.push(record);
            }
        }
    }

    async fn retry_unpersisted(&mut self) {
        if self.unpersisted.is_empty() {
            return;
        }
        let records = std::mem::take(&mut self.unpersisted);
        for record in records {
            self.persist(record).await;
        }
    }

    /// Returns `false` if cancellation interrupted the batch.
    async fn attempt_due(&self, cancel_token: &CancellationToken) -> bool {
        let entries = match self.db.due_entries(Utc::now(), BATCH_SIZE).await {
            Ok(entries) => entries,
            Err(err) => {
                log_error!("failed to load due outbox entries: {err:#}");
                return true;
            }
        };

        for entry in entries {
            tokio::select! {
                _ = self.attempt(entry) => {}
                _ = cancel_token.cancelled() => return false,
            }
        }
        true
    }

    async fn attempt(&self, entry: OutboxEntry) {
        let mut record = entry.record.clone();
        record.sync_state = SyncState::Synced;
        record.retry_count = entry.retry_count;

        let payload = match serde_json::to_value(&record) {
            Ok(payload) => payload,
            Err(err) => {
                log_error!("failed to encode {} for upsert: {err}", entry.event_id);
                return;
            }
        };

        let id = entry.event_id.to_string();
        let upsert = self.store.upsert(&self.collection, &id, &payload);
        let result = match tokio::time::timeout(Duration::from_secs(UPSERT_TIMEOUT_SECS), upsert).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(EngineError::SyncTransportError(format!("{err:#}"))),
            Err(_) => Err(EngineError::SyncTransportError(format!(
                "upsert timed out after {UPSERT_TIMEOUT_SECS}s"
            ))),
        };

        match result {
            Ok(()) => self.on_success(&entry).await,
            Err(err) => self.on_failure(&entry, err).await,
        }
    }

    async fn on_success(&self, entry: &OutboxEntry) {
        match self
            .db
            .mark_synced(entry.event_id, entry.revision, Utc::now())
            .await
        {
            Ok(true) => {
                log_info!(
                    "synced {} revision {} after {} retries",
                    entry.event_id,
                    entry.revision,
                    entry.retry_count
                );
                let _ = self.feedback.send(Feedback::Synced {
                    event_id: entry.event_id,
                    revision: entry.revision,
                });
            }
            Ok(false) => {
                log_debug!(
                    "{} changed while revision {} was in flight; keeping it pending",
                    entry.event_id,
                    entry.revision
                );
            }
            Err(err) => log_error!("failed to mark {} synced: {err:#}", entry.event_id),
        }
    }

    async fn on_failure(&self, entry: &OutboxEntry, err: EngineError) {
        let retry_count = entry.retry_count.saturating_add(1);
        let delay = self.policy.delay(entry.retry_count);
        let next_attempt_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));

        log_warn!(
            "{err} for {} (attempt {}), retrying in {:.1}s",
            entry.event_id,
            retry_count,
            delay.as_secs_f64()
        );

        if let Err(db_err) = self
            .db
            .record_failure(entry.event_id, retry_count, next_attempt_at, &err.to_string())
            .await
        {
            log_error!("failed to record sync failure for {}: {db_err:#}", entry.event_id);
            return;
        }

        let _ = self.feedback.send(Feedback::SyncRetry {
            event_id: entry.event_id,
            retry_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{ChannelSnapshot, GazeSnapshot},
        sync::SyncQueue,
        test_support::FakeStore,
    };
    use uuid::Uuid;

    fn record() -> DistractionEvent {
        DistractionEvent::new(
            Uuid::new_v4(),
            Some("user-1".into()),
            "looking down (y=0.900>0.800)".into(),
            Utc::now(),
            ChannelSnapshot::Gaze(GazeSnapshot {
                x: 0.5,
                y: 0.9,
                tracking_valid: true,
            }),
        )
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn retries_until_store_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("outbox.sqlite3")).unwrap();
        let store = Arc::new(FakeStore::failing(3));
        let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();
        let drainer = SyncDrainer::new(
            db.clone(),
            store.clone(),
            "distractions".into(),
            fast_policy(),
            Duration::from_millis(5),
            feedback_tx,
        );

        let (queue, inbound) = SyncQueue::channel(4);
        let (drain_tx, drain_rx) = watch::channel(false);
        let event = record();
        queue.try_enqueue(&event).unwrap();
        drop(queue);
        drain_tx.send(true).unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            drainer.run(inbound, CancellationToken::new(), drain_rx),
        )
        .await
        .expect("drainer finished");

        assert_eq!(store.attempts(), 4);
        assert_eq!(store.record_count(), 1);
        let remote = store.record("distractions", &event.id.to_string()).unwrap();
        assert_eq!(remote["sync_state"], "synced");
        assert_eq!(remote["retry_count"], 3);
        assert_eq!(remote["user_id"], "user-1");

        let mut retries = 0;
        let mut synced = None;
        while let Ok(feedback) = feedback_rx.try_recv() {
            match feedback {
                Feedback::SyncRetry { .. } => retries += 1,
                Feedback::Synced { revision, .. } => synced = Some(revision),
                Feedback::Enriched { .. } => unreachable!(),
            }
        }
        assert_eq!(retries, 3);
        assert_eq!(synced, Some(1));
        assert_eq!(db.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancellation_leaves_rows_pending() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("outbox.sqlite3")).unwrap();
        let store = Arc::new(FakeStore::failing(usize::MAX));
        let (feedback_tx, _feedback_rx) = mpsc::unbounded_channel();
        let drainer = SyncDrainer::new(
            db.clone(),
            store,
            "distractions".into(),
            fast_policy(),
            Duration::from_millis(5),
            feedback_tx,
        );

        let (queue, inbound) = SyncQueue::channel(4);
        let (_drain_tx, drain_rx) = watch::channel(true);
        queue.try_enqueue(&record()).unwrap();

        let token = CancellationToken::new();
        let handle = tokio::spawn(drainer.run(inbound, token.clone(), drain_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(db.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancelled_drain_persists_queued_records() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("outbox.sqlite3")).unwrap();
        let store = Arc::new(FakeStore::stalling(Duration::from_secs(3)));
        let (feedback_tx, _feedback_rx) = mpsc::unbounded_channel();
        let drainer = SyncDrainer::new(
            db.clone(),
            store.clone(),
            "distractions".into(),
            fast_policy(),
            Duration::from_millis(5),
            feedback_tx,
        );

        let (queue, inbound) = SyncQueue::channel(4);
        let (_drain_tx, drain_rx) = watch::channel(true);
        let event = record();
        queue.try_enqueue(&event).unwrap();

        let token = CancellationToken::new();
        let handle = tokio::spawn(drainer.run(inbound, token.clone(), drain_rx));
        while store.attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The upsert of revision 1 is stuck; the resolution waits in memory.
        let resolved = event.resolved_at(Utc::now()).unwrap();
        queue.try_enqueue(&resolved).unwrap();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("drainer stopped promptly")
            .unwrap();

        let entry = db.get_outbox_entry(event.id).await.unwrap().unwrap();
        assert_eq!(entry.revision, 2);
        assert_eq!(entry.record.status, crate::models::EventStatus::Resolved);
        assert_eq!(entry.sync_state, SyncState::Pending);
    }
}
