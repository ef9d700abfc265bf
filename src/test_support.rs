//! In-memory collaborators for tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::{
    models::{ApplicationCategory, Enrichment, WindowSnapshot},
    providers::{Classifier, Collaborators, GazeProvider, GazeSample, RecordStore, WindowProvider},
};

/// Returns whatever sample was last set.
pub struct FakeGaze {
    sample: Mutex<Option<GazeSample>>,
}

impl FakeGaze {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            sample: Mutex::new(Some(GazeSample {
                x,
                y,
                tracking_valid: true,
            })),
        }
    }

    pub fn set(&self, x: f64, y: f64, tracking_valid: bool) {
        *self.sample.lock().unwrap() = Some(GazeSample {
            x,
            y,
            tracking_valid,
        });
    }

    pub fn fail(&self) {
        *self.sample.lock().unwrap() = None;
    }
}

impl GazeProvider for FakeGaze {
    fn sample(&self) -> Result<GazeSample> {
        let sample = *self.sample.lock().unwrap();
        sample.ok_or_else(|| anyhow!("camera unavailable"))
    }
}

pub struct FakeWindow {
    window: Mutex<Option<WindowSnapshot>>,
}

impl FakeWindow {
    pub fn new(title: &str, process_name: &str) -> Self {
        let fake = Self {
            window: Mutex::new(None),
        };
        fake.set(title, process_name);
        fake
    }

    pub fn set(&self, title: &str, process_name: &str) {
        *self.window.lock().unwrap() = Some(WindowSnapshot {
            title: title.into(),
            process_name: process_name.into(),
            process_id: 4242,
            window_id: Some(7),
        });
    }
}

impl WindowProvider for FakeWindow {
    fn current_window(&self) -> Result<WindowSnapshot> {
        self.window
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("no foreground window"))
    }
}

/// Fails the first `failures` upserts, then keeps the last write per id.
/// With a `stall`, every upsert sleeps that long and then fails.
#[derive(Default)]
pub struct FakeStore {
    failures_left: AtomicUsize,
    stall: Option<Duration>,
    attempts: AtomicUsize,
    records: Mutex<HashMap<(String, String), serde_json::Value>>,
}

impl FakeStore {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn stalling(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn record(&self, collection: &str, id: &str) -> Option<serde_json::Value> {
        self.records
            .lock()
            .unwrap()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn upsert(&self, collection: &str, id: &str, record: &serde_json::Value) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
            bail!("store timed out");
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            bail!("store unreachable");
        }
        self.records
            .lock()
            .unwrap()
            .insert((collection.to_string(), id.to_string()), record.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ClassifierMode {
    Succeed(ApplicationCategory),
    Fail,
    Hang(Duration),
}

pub struct FakeClassifier {
    mode: ClassifierMode,
    calls: AtomicUsize,
}

impl FakeClassifier {
    pub fn new(mode: ClassifierMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn assess(
        &self,
        window_title: &str,
        process_name: &str,
        _timeout: Duration,
    ) -> Result<Enrichment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            ClassifierMode::Succeed(category) => Ok(Enrichment {
                category,
                confidence: 0.9,
                reasoning: format!("{process_name} showing {window_title}"),
                suggested_action: "close the tab".into(),
            }),
            ClassifierMode::Fail => bail!("classifier rejected the request"),
            ClassifierMode::Hang(duration) => {
                tokio::time::sleep(duration).await;
                bail!("classifier hung")
            }
        }
    }
}

pub struct Fakes {
    pub gaze: Arc<FakeGaze>,
    pub window: Arc<FakeWindow>,
    pub store: Arc<FakeStore>,
    pub classifier: Option<Arc<FakeClassifier>>,
}

impl Fakes {
    /// Focused user in an editor, reliable store, no classifier.
    pub fn focused() -> Self {
        Self {
            gaze: Arc::new(FakeGaze::new(0.5, 0.5)),
            window: Arc::new(FakeWindow::new("main.rs - focusguard", "code.exe")),
            store: Arc::new(FakeStore::default()),
            classifier: None,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            gaze: self.gaze.clone(),
            window: self.window.clone(),
            store: self.store.clone(),
            classifier: self
                .classifier
                .clone()
                .map(|c| c as Arc<dyn Classifier>),
        }
    }
}
