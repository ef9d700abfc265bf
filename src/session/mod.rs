//! One tracking session: calibration, the samplers, the coordinator, the
//! enricher and the outbox drainer, started together and stopped together.

use std::{path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    calibration::{CalibrationMapper, CalibrationPoint, CalibrationProfile},
    config::EngineConfig,
    coordinator::{
        Control, Coordinator, CoordinatorChannels, DistractionTracker, EventLogSnapshot,
    },
    db::Database,
    enrichment::Enricher,
    error::{EngineError, EngineResult},
    models::{DistractionEvent, SessionStatus, SessionSummary},
    providers::Collaborators,
    sensing::{
        gaze::GazeSampler, window::WindowSampler, GazeThresholds, SensingController, WindowRules,
    },
    sync::{BackoffPolicy, SyncDrainer, SyncQueue},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

struct Running {
    sensing: SensingController,
    enricher: Option<(CancellationToken, JoinHandle<()>)>,
    control_tx: mpsc::Sender<Control>,
    coordinator: JoinHandle<Vec<DistractionEvent>>,
    drainer: JoinHandle<()>,
    drainer_token: CancellationToken,
    drain_tx: watch::Sender<bool>,
}

pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    profile: Arc<CalibrationProfile>,
    db: Database,
    snapshot_rx: watch::Receiver<EventLogSnapshot>,
    root_token: CancellationToken,
    running: Option<Running>,
}

/// Fits the calibration profile, falling back to the identity mapping when
/// too few or degenerate points were collected.
pub fn calibrate(points: &[CalibrationPoint], min_points: usize) -> EngineResult<CalibrationProfile> {
    let mut mapper = CalibrationMapper::new(min_points);
    for point in points {
        mapper.collect_point(point.raw, point.screen);
    }
    match mapper.finalize() {
        Ok(profile) => Ok(profile),
        Err(err) if err.is_calibration() => {
            log_warn!("{err}; continuing uncalibrated with the identity mapping");
            Ok(CalibrationProfile::identity())
        }
        Err(err) => Err(err),
    }
}

impl Session {
    /// Validates the config, opens the outbox and spawns every loop.
    ///
    /// Only configuration and outbox errors are returned; a failed
    /// calibration degrades to an uncalibrated session.
    pub async fn start(
        config: EngineConfig,
        calibration_points: &[CalibrationPoint],
        collaborators: Collaborators,
        outbox_path: impl AsRef<Path>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let profile = Arc::new(calibrate(calibration_points, config.calibration_min_points)?);
        let db = Database::new(outbox_path.as_ref().to_path_buf())?;

        let backlog = db.pending_count().await?;
        if backlog > 0 {
            log_info!("outbox holds {backlog} unsynced records from earlier sessions");
        }

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let root_token = CancellationToken::new();

        let (gaze_tx, gaze_rx) = mpsc::channel(config.signal_queue_capacity);
        let (window_tx, window_rx) = mpsc::channel(config.signal_queue_capacity);
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(1);
        let (sync_queue, sync_rx) = SyncQueue::channel(config.sync_queue_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(EventLogSnapshot::default());

        let drainer_token = root_token.child_token();
        let (drain_tx, drain_rx) = watch::channel(false);
        let drainer = SyncDrainer::new(
            db.clone(),
            Arc::clone(&collaborators.store),
            config.sync_collection.clone(),
            BackoffPolicy::from_config(&config),
            config.sync_poll_interval(),
            feedback_tx.clone(),
        );
        let drainer = tokio::spawn(drainer.run(sync_rx, drainer_token.clone(), drain_rx));

        let (enricher, enrichment_tx) = match (&collaborators.classifier, config.assessment_enabled) {
            (Some(classifier), true) => {
                let token = root_token.child_token();
                let (tx, rx) = mpsc::channel(config.signal_queue_capacity);
                let worker = Enricher::new(
                    Arc::clone(classifier),
                    config.classifier_timeout(),
                    feedback_tx.clone(),
                );
                let handle = tokio::spawn(worker.run(rx, token.clone()));
                (Some((token, handle)), Some(tx))
            }
            (None, true) => {
                log_warn!("assessment enabled without a classifier; events stay unenriched");
                (None, None)
            }
            _ => (None, None),
        };
        drop(feedback_tx);

        let tracker = DistractionTracker::new(id, config.user_id.clone(), config.distraction_timeout());
        let coordinator = Coordinator::new(tracker, sync_queue, enrichment_tx, snapshot_tx);
        let coordinator = tokio::spawn(coordinator.run(CoordinatorChannels {
            gaze_rx,
            window_rx,
            feedback_rx,
            control_rx,
        }));

        let mut sensing = SensingController::new();
        let gaze = GazeSampler {
            provider: Arc::clone(&collaborators.gaze),
            profile: Arc::clone(&profile),
            thresholds: GazeThresholds::from_config(&config),
            period: config.gaze_period(),
            provider_timeout: config.provider_timeout(),
        };
        let window = WindowSampler {
            provider: Arc::clone(&collaborators.window),
            rules: WindowRules::from_config(&config),
            period: config.window_period(),
            provider_timeout: config.provider_timeout(),
        };
        sensing.start_sensing(gaze, gaze_tx, window, window_tx, &root_token)?;

        log_info!(
            "session {id} started ({}, timeout {:.1}s)",
            if profile.is_calibrated() { "calibrated" } else { "uncalibrated" },
            config.distraction_timeout_seconds
        );

        Ok(Self {
            id,
            started_at,
            profile,
            db,
            snapshot_rx,
            root_token,
            running: Some(Running {
                sensing,
                enricher,
                control_tx,
                coordinator,
                drainer,
                drainer_token,
                drain_tx,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> SessionStatus {
        if self.running.is_some() {
            SessionStatus::Running
        } else {
            SessionStatus::Stopped
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.profile.is_calibrated()
    }

    pub fn calibration(&self) -> &CalibrationProfile {
        &self.profile
    }

    /// Current event log, active events included.
    pub fn events(&self) -> EventLogSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receives a fresh snapshot after every change to the log.
    pub fn subscribe(&self) -> watch::Receiver<EventLogSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Unsynced rows in the outbox file, including earlier sessions' rows.
    pub async fn pending_sync_count(&self) -> EngineResult<usize> {
        Ok(self.db.pending_count().await?)
    }

    pub fn summary(&self) -> SessionSummary {
        let events: Vec<DistractionEvent> =
            self.events().iter().map(|event| (**event).clone()).collect();
        SessionSummary::from_events(
            self.id,
            self.started_at,
            self.is_calibrated(),
            &events,
            Utc::now(),
        )
    }

    /// Stops sampling, resolves open events at the stop time and waits up to
    /// `drain_timeout` for the outbox to empty. Returns the final event log.
    pub async fn stop(&mut self, drain_timeout: Duration) -> EngineResult<Vec<DistractionEvent>> {
        let mut running = self.running.take().ok_or(EngineError::SessionClosed)?;
        let stop_time = Utc::now();

        if let Err(err) = running.sensing.stop_sensing().await {
            log_error!("failed to stop samplers cleanly: {err:#}");
        }

        if let Some((token, handle)) = running.enricher.take() {
            token.cancel();
            if let Err(err) = handle.await {
                log_error!("enricher task failed to join: {err}");
            }
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let finalize = Control::Finalize {
            stop_time,
            reply: reply_tx,
        };
        if running.control_tx.send(finalize).await.is_err() || reply_rx.await.is_err() {
            log_error!("coordinator exited before finalizing session {}", self.id);
        }

        let _ = running.drain_tx.send(true);
        let mut drainer = running.drainer;
        if tokio::time::timeout(drain_timeout, &mut drainer).await.is_err() {
            log_warn!(
                "outbox not drained within {:.1}s; cancelling the drainer",
                drain_timeout.as_secs_f64()
            );
            running.drainer_token.cancel();
            if let Err(err) = drainer.await {
                log_error!("sync drainer failed to join: {err}");
            }
            match self.db.pending_count_for_session(self.id).await {
                Ok(pending) => log_warn!(
                    "{pending} records of session {} stay queued in the outbox",
                    self.id
                ),
                Err(err) => log_error!("failed to count queued records: {err:#}"),
            }
        }

        let events = match running.coordinator.await {
            Ok(events) => events,
            Err(err) => {
                log_error!("coordinator task failed: {err}");
                self.events().iter().map(|event| (**event).clone()).collect()
            }
        };

        let summary = SessionSummary::from_events(
            self.id,
            self.started_at,
            self.is_calibrated(),
            &events,
            stop_time,
        );
        log_info!(
            "session {} stopped: {} events ({} enriched)",
            self.id,
            summary.total_events,
            summary.enriched_events
        );
        Ok(events)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.root_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calibration::{Point, DEFAULT_TARGETS},
        models::{ApplicationCategory, Channel, EventStatus, SyncState},
        test_support::{ClassifierMode, FakeClassifier, FakeStore, Fakes},
    };
    use tempfile::TempDir;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            distraction_timeout_seconds: 0.2,
            gaze_sample_rate_hz: 50.0,
            window_poll_interval_seconds: 0.02,
            sync_initial_backoff_seconds: 0.01,
            sync_max_backoff_seconds: 0.05,
            sync_poll_interval_seconds: 0.01,
            ..EngineConfig::default()
        }
    }

    fn identity_points() -> Vec<CalibrationPoint> {
        DEFAULT_TARGETS
            .iter()
            .map(|target| CalibrationPoint {
                raw: *target,
                screen: *target,
            })
            .collect()
    }

    fn outbox(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("outbox.db")
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn held_gaze_produces_one_synced_event() {
        let dir = tempfile::tempdir().unwrap();
        let fakes = Fakes::focused();
        fakes.gaze.set(0.5, 0.9, true);

        let mut session = Session::start(fast_config(), &identity_points(), fakes.collaborators(), outbox(&dir))
            .await
            .unwrap();
        assert!(session.is_calibrated());

        sleep_ms(500).await;
        fakes.gaze.set(0.5, 0.5, true);
        sleep_ms(150).await;

        let events = session.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.channel, Channel::Gaze);
        assert_eq!(event.status, EventStatus::Resolved);
        assert!(event.reason.contains("looking down"));
        assert!(event.reason.contains("0.800"));
        assert!(event.duration().unwrap() >= chrono::Duration::milliseconds(200));
        assert_eq!(event.sync_state, SyncState::Synced);

        assert_eq!(fakes.store.record_count(), 1);
        let remote = fakes.store.record("distractions", &event.id.to_string()).unwrap();
        assert_eq!(remote["status"], "resolved");
        assert_eq!(session.pending_sync_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn short_blip_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let fakes = Fakes::focused();
        let config = EngineConfig {
            distraction_timeout_seconds: 1.0,
            ..fast_config()
        };

        let mut session = Session::start(config, &identity_points(), fakes.collaborators(), outbox(&dir))
            .await
            .unwrap();
        sleep_ms(50).await;
        fakes.gaze.set(0.5, 0.95, true);
        sleep_ms(100).await;
        fakes.gaze.set(0.5, 0.5, true);
        sleep_ms(100).await;

        let events = session.stop(Duration::from_secs(2)).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(fakes.store.record_count(), 0);
    }

    async fn run_youtube_session(mode: ClassifierMode) -> (Vec<DistractionEvent>, Fakes) {
        let dir = tempfile::tempdir().unwrap();
        let mut fakes = Fakes::focused();
        fakes.classifier = Some(Arc::new(FakeClassifier::new(mode)));
        fakes.window.set("YouTube - Home", "browser.exe");
        let config = EngineConfig {
            assessment_enabled: true,
            ..fast_config()
        };

        let mut session = Session::start(config, &identity_points(), fakes.collaborators(), outbox(&dir))
            .await
            .unwrap();
        sleep_ms(500).await;
        fakes.window.set("main.rs - focusguard", "code.exe");
        sleep_ms(150).await;

        let events = session.stop(Duration::from_secs(5)).await.unwrap();
        (events, fakes)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blacklisted_title_is_enriched() {
        let (events, fakes) =
            run_youtube_session(ClassifierMode::Succeed(ApplicationCategory::Streaming)).await;

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.channel, Channel::Window);
        assert!(event.reason.contains("youtube"));
        let enrichment = event.enrichment.as_ref().expect("enrichment applied");
        assert_eq!(enrichment.category, ApplicationCategory::Streaming);
        assert_eq!(fakes.classifier.as_ref().unwrap().calls(), 1);

        let remote = fakes.store.record("distractions", &event.id.to_string()).unwrap();
        assert_eq!(remote["enrichment"]["category"], "streaming");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn classifier_failure_leaves_enrichment_empty() {
        let (events, fakes) = run_youtube_session(ClassifierMode::Fail).await;

        assert_eq!(events.len(), 1);
        assert!(events[0].enrichment.is_none());
        assert_eq!(events[0].status, EventStatus::Resolved);
        let remote = fakes.store.record("distractions", &events[0].id.to_string()).unwrap();
        assert!(remote["enrichment"].is_null());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_upserts_are_retried_until_synced() {
        let dir = tempfile::tempdir().unwrap();
        let mut fakes = Fakes::focused();
        fakes.store = Arc::new(FakeStore::failing(3));
        fakes.gaze.set(0.5, 0.9, true);

        let mut session = Session::start(fast_config(), &identity_points(), fakes.collaborators(), outbox(&dir))
            .await
            .unwrap();
        sleep_ms(400).await;
        fakes.gaze.set(0.5, 0.5, true);
        sleep_ms(100).await;

        let events = session.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sync_state, SyncState::Synced);
        assert!(fakes.store.attempts() >= 4);
        assert_eq!(fakes.store.record_count(), 1);
        assert_eq!(session.pending_sync_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn active_event_is_resolved_at_stop() {
        let dir = tempfile::tempdir().unwrap();
        let fakes = Fakes::focused();
        fakes.gaze.set(0.5, 0.5, false);

        let mut session = Session::start(fast_config(), &identity_points(), fakes.collaborators(), outbox(&dir))
            .await
            .unwrap();
        sleep_ms(400).await;

        let live = session.events();
        assert_eq!(live.len(), 1);
        assert!(live[0].is_active());
        assert_eq!(live[0].reason, "no face detected");

        let events = session.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Resolved);
        assert!(events[0].end_time.unwrap() >= events[0].start_time);

        let summary = session.summary();
        assert_eq!(summary.total_events, 1);
        assert_eq!(summary.per_channel[&Channel::Gaze].resolved, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn incomplete_calibration_falls_back_to_identity() {
        let dir = tempfile::tempdir().unwrap();
        let fakes = Fakes::focused();
        let points: Vec<CalibrationPoint> = identity_points().into_iter().take(3).collect();

        let mut session = Session::start(fast_config(), &points, fakes.collaborators(), outbox(&dir))
            .await
            .unwrap();
        assert!(!session.is_calibrated());
        assert_eq!(session.calibration().map(Point::new(0.3, 0.7)), Point::new(0.3, 0.7));

        session.stop(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            session.stop(Duration::from_secs(1)).await,
            Err(EngineError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            gaze_threshold_x_min: 0.95,
            ..EngineConfig::default()
        };
        let result = Session::start(config, &[], Fakes::focused().collaborators(), outbox(&dir)).await;
        assert!(matches!(result, Err(EngineError::ConfigInvalid { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pending_records_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = Fakes::focused();
        first.store = Arc::new(FakeStore::failing(usize::MAX));
        first.gaze.set(0.5, 0.9, true);

        let mut session = Session::start(fast_config(), &identity_points(), first.collaborators(), outbox(&dir))
            .await
            .unwrap();
        sleep_ms(400).await;
        let events = session.stop(Duration::from_millis(100)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(session.pending_sync_count().await.unwrap(), 1);
        drop(session);

        let second = Fakes::focused();
        let mut session = Session::start(fast_config(), &identity_points(), second.collaborators(), outbox(&dir))
            .await
            .unwrap();
        session.stop(Duration::from_secs(5)).await.unwrap();

        let remote = second
            .store
            .record("distractions", &events[0].id.to_string())
            .expect("earlier session's record delivered");
        assert_eq!(remote["status"], "resolved");
        assert_eq!(session.pending_sync_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_timeout_keeps_latest_revision_durable() {
        let dir = tempfile::tempdir().unwrap();
        let mut fakes = Fakes::focused();
        fakes.store = Arc::new(FakeStore::stalling(Duration::from_secs(3)));
        fakes.gaze.set(0.5, 0.95, true);

        let mut session = Session::start(fast_config(), &identity_points(), fakes.collaborators(), outbox(&dir))
            .await
            .unwrap();
        sleep_ms(400).await;
        let events = session.stop(Duration::from_millis(300)).await.unwrap();
        drop(session);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].revision, 2);

        let db = Database::new(outbox(&dir)).unwrap();
        let entry = db.get_outbox_entry(events[0].id).await.unwrap().unwrap();
        assert_eq!(entry.revision, 2);
        assert_eq!(entry.record.status, EventStatus::Resolved);
        assert_eq!(db.pending_count().await.unwrap(), 1);
    }
}
