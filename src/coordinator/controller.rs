use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::{
    enrichment::EnrichmentRequest,
    models::{Channel, DistractionEvent, Enrichment, Signal},
    sync::{EnqueueError, SyncQueue},
};

use super::state::{window_target, DistractionTracker, Transition};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Immutable view of the event log handed to readers.
pub type EventLogSnapshot = Arc<Vec<Arc<DistractionEvent>>>;

/// Results reported back by the enricher and the sync drainer.
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    Enriched {
        event_id: Uuid,
        enrichment: Enrichment,
    },
    Synced {
        event_id: Uuid,
        revision: u64,
    },
    SyncRetry {
        event_id: Uuid,
        retry_count: u32,
    },
}

pub(crate) enum Control {
    /// Stop taking signals, resolve what is open, flush the sync queue.
    Finalize {
        stop_time: DateTime<Utc>,
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct CoordinatorChannels {
    pub gaze_rx: mpsc::Receiver<Signal>,
    pub window_rx: mpsc::Receiver<Signal>,
    pub feedback_rx: mpsc::UnboundedReceiver<Feedback>,
    pub control_rx: mpsc::Receiver<Control>,
}

/// Single writer of the event log. Every mutation happens inside `run`, in
/// message arrival order.
pub struct Coordinator {
    tracker: DistractionTracker,
    sync_queue: Option<SyncQueue>,
    enricher: Option<mpsc::Sender<EnrichmentRequest>>,
    /// Ids whose latest record the sync queue rejected.
    deferred: BTreeSet<Uuid>,
    snapshot_tx: watch::Sender<EventLogSnapshot>,
}

impl Coordinator {
    pub fn new(
        tracker: DistractionTracker,
        sync_queue: SyncQueue,
        enricher: Option<mpsc::Sender<EnrichmentRequest>>,
        snapshot_tx: watch::Sender<EventLogSnapshot>,
    ) -> Self {
        Self {
            tracker,
            sync_queue: Some(sync_queue),
            enricher,
            deferred: BTreeSet::new(),
            snapshot_tx,
        }
    }

    /// Returns the final event log once every feedback sender is gone.
    pub(crate) async fn run(mut self, channels: CoordinatorChannels) -> Vec<DistractionEvent> {
        let CoordinatorChannels {
            mut gaze_rx,
            mut window_rx,
            mut feedback_rx,
            mut control_rx,
        } = channels;

        loop {
            // Finalize owns every signal still queued, so it goes first and
            // signals stamped after the stop time are never applied.
            tokio::select! {
                biased;

                control = control_rx.recv() => {
                    let (stop_time, reply) = match control {
                        Some(Control::Finalize { stop_time, reply }) => (stop_time, Some(reply)),
                        None => (Utc::now(), None),
                    };
                    for rx in [&mut gaze_rx, &mut window_rx] {
                        while let Ok(signal) = rx.try_recv() {
                            if signal.timestamp <= stop_time {
                                self.on_signal(signal);
                            }
                        }
                    }
                    while let Ok(feedback) = feedback_rx.try_recv() {
                        self.on_feedback(feedback);
                    }
                    self.finalize(stop_time).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    break;
                }
                Some(feedback) = feedback_rx.recv() => self.on_feedback(feedback),
                Some(signal) = gaze_rx.recv() => self.on_signal(signal),
                Some(signal) = window_rx.recv() => self.on_signal(signal),
            }
        }

        // Sync acknowledgements keep arriving while the outbox drains.
        while let Some(feedback) = feedback_rx.recv().await {
            self.on_feedback(feedback);
        }

        self.tracker
            .events()
            .iter()
            .map(|event| (**event).clone())
            .collect()
    }

    fn publish(&self) {
        let snapshot: EventLogSnapshot = Arc::new(self.tracker.events().to_vec());
        self.snapshot_tx.send_replace(snapshot);
    }

    fn on_signal(&mut self, signal: Signal) {
        let channel = signal.channel();
        match self.tracker.apply_signal(&signal) {
            Transition::Idle | Transition::Pending => {}
            Transition::Refreshed => self.publish(),
            Transition::Created(event) => {
                log_info!(
                    "DISTRACTION STARTED: {} {} - {}",
                    channel.as_str(),
                    event.id,
                    event.reason
                );
                self.enqueue(&event);
                self.dispatch_enrichment(&event);
                self.publish();
            }
            Transition::Resolved(event) => {
                let duration_secs = event
                    .duration()
                    .map(|d| d.num_milliseconds() as f64 / 1000.0)
                    .unwrap_or_default();
                log_info!(
                    "DISTRACTION RESOLVED: {} {} - duration {:.1}s",
                    channel.as_str(),
                    event.id,
                    duration_secs
                );
                self.enqueue(&event);
                self.publish();
            }
        }
        self.retry_deferred();
    }

    fn on_feedback(&mut self, feedback: Feedback) {
        match feedback {
            Feedback::Enriched {
                event_id,
                enrichment,
            } => match self.tracker.apply_enrichment(event_id, enrichment) {
                Some(event) => {
                    log_info!(
                        "enriched {} as {:?} ({:.2})",
                        event_id,
                        event.enrichment.as_ref().map(|e| e.category),
                        event.enrichment.as_ref().map(|e| e.confidence).unwrap_or_default()
                    );
                    self.enqueue(&event);
                    self.publish();
                }
                None => log_debug!("ignoring enrichment for {event_id}"),
            },
            Feedback::Synced { event_id, revision } => {
                if self.tracker.mark_synced(event_id, revision) {
                    self.publish();
                }
            }
            Feedback::SyncRetry {
                event_id,
                retry_count,
            } => {
                self.tracker.record_retry(event_id, retry_count);
                self.publish();
            }
        }
        self.retry_deferred();
    }

    fn enqueue(&mut self, event: &DistractionEvent) {
        let Some(queue) = &self.sync_queue else {
            log_error!("sync queue already closed, cannot enqueue {}", event.id);
            return;
        };
        match queue.try_enqueue(event) {
            Ok(()) => {
                self.deferred.remove(&event.id);
            }
            Err(EnqueueError::Full) => {
                log_warn!("sync queue full, deferring {}", event.id);
                self.deferred.insert(event.id);
            }
            Err(EnqueueError::Closed) => {
                log_error!("sync queue closed, {} stays in memory only", event.id);
                self.deferred.insert(event.id);
            }
        }
    }

    fn retry_deferred(&mut self) {
        let Some(queue) = &self.sync_queue else {
            return;
        };
        while let Some(id) = self.deferred.first().copied() {
            let Some(event) = self.tracker.get(id).cloned() else {
                self.deferred.remove(&id);
                continue;
            };
            match queue.try_enqueue(&event) {
                Ok(()) => {
                    self.deferred.remove(&id);
                }
                Err(_) => break,
            }
        }
    }

    fn dispatch_enrichment(&self, event: &DistractionEvent) {
        if event.channel != Channel::Window {
            return;
        }
        let (Some(enricher), Some((window_title, process_name))) =
            (&self.enricher, window_target(event))
        else {
            return;
        };

        let request = EnrichmentRequest {
            event_id: event.id,
            window_title,
            process_name,
        };
        if let Err(err) = enricher.try_send(request) {
            log_warn!("enrichment skipped for {}: {err}", event.id);
        }
    }

    async fn finalize(&mut self, stop_time: DateTime<Utc>) {
        let resolved = self.tracker.finalize(stop_time);
        for event in &resolved {
            log_info!(
                "DISTRACTION RESOLVED at session stop: {} {}",
                event.channel.as_str(),
                event.id
            );
            self.enqueue(event);
        }
        self.enricher = None;

        if let Some(queue) = self.sync_queue.take() {
            for id in std::mem::take(&mut self.deferred) {
                let Some(event) = self.tracker.get(id).cloned() else {
                    continue;
                };
                if let Err(err) = queue.enqueue(&event).await {
                    log_error!("failed to flush {} into sync queue: {err}", id);
                }
            }
        }
        self.publish();
    }
}
