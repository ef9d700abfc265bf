//! Distraction detection engine.
//!
//! A [`Session`] samples gaze and the focused window, debounces both
//! channels into [`DistractionEvent`]s, optionally classifies window
//! distractions, and delivers every event to a remote store through a
//! durable SQLite outbox.

pub mod calibration;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod models;
pub mod providers;
pub mod sensing;
pub mod session;
pub mod sync;
mod utils;

#[cfg(test)]
mod test_support;

pub use calibration::{CalibrationMapper, CalibrationPoint, CalibrationProfile, Point};
pub use config::EngineConfig;
pub use coordinator::EventLogSnapshot;
pub use error::{EngineError, EngineResult};
pub use models::{
    ApplicationCategory, Channel, ChannelSnapshot, DistractionEvent, Enrichment, EventStatus,
    GazeSnapshot, SessionSummary, SyncState, WindowSnapshot,
};
pub use providers::{
    Classifier, Collaborators, GazeProvider, GazeSample, HttpClassifier, HttpRecordStore,
    RecordStore, WindowProvider,
};
pub use session::Session;
pub use utils::init_logging;
