//! Collaborators the engine consumes but does not own.
//!
//! Gaze and window providers are blocking (camera pipeline, OS queries) and
//! are always called from `spawn_blocking` under a timeout. The store and
//! the classifier are network clients and are async.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Enrichment, WindowSnapshot};

pub mod http;

pub use http::{HttpClassifier, HttpRecordStore};

/// Raw gaze vector in detector space plus tracking validity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GazeSample {
    pub x: f64,
    pub y: f64,
    pub tracking_valid: bool,
}

pub trait GazeProvider: Send + Sync {
    fn sample(&self) -> Result<GazeSample>;
}

pub trait WindowProvider: Send + Sync {
    fn current_window(&self) -> Result<WindowSnapshot>;
}

/// Idempotent upsert sink keyed by record id; last write wins.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn upsert(&self, collection: &str, id: &str, record: &serde_json::Value) -> Result<()>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn assess(
        &self,
        window_title: &str,
        process_name: &str,
        timeout: Duration,
    ) -> Result<Enrichment>;
}

/// The injected collaborators for one session.
#[derive(Clone)]
pub struct Collaborators {
    pub gaze: Arc<dyn GazeProvider>,
    pub window: Arc<dyn WindowProvider>,
    pub store: Arc<dyn RecordStore>,
    pub classifier: Option<Arc<dyn Classifier>>,
}
