//! Error taxonomy for the detection engine.
//!
//! Only `ConfigInvalid` and `Storage` ever escape `Session::start`. Provider,
//! classifier and transport errors are recovered where they happen and only
//! show up in logs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("calibration incomplete: collected {collected} of {required} points")]
    CalibrationIncomplete { collected: usize, required: usize },

    #[error("calibration points are degenerate: {0}")]
    CalibrationDegenerate(String),

    #[error("classifier timed out after {0:.1}s")]
    ClassifierTimeout(f64),

    #[error("classifier error: {0}")]
    ClassifierError(String),

    #[error("sync transport error: {0}")]
    SyncTransportError(String),

    #[error("invalid config field `{field}`: {message}")]
    ConfigInvalid { field: &'static str, message: String },

    #[error("outbox storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("session already stopped")]
    SessionClosed,
}

impl EngineError {
    pub(crate) fn config(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::ConfigInvalid {
            field,
            message: message.into(),
        }
    }

    /// Calibration failures fall back to the identity profile instead of
    /// aborting the session.
    pub fn is_calibration(&self) -> bool {
        matches!(
            self,
            EngineError::CalibrationIncomplete { .. } | EngineError::CalibrationDegenerate(_)
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
