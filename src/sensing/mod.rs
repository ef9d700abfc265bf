//! Periodic samplers that turn provider readings into [`Signal`]s.
//!
//! Each sampler owns the sending half of a bounded channel into the
//! coordinator and emits on every tick, distracted or not.

use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{error::EngineError, models::Signal};

pub mod controller;
pub mod gaze;
pub mod window;

pub use controller::SensingController;
pub use gaze::{classify_gaze, GazeThresholds};
pub use window::{classify_window, WindowRules};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Runs a blocking provider call on the blocking pool, bounded by `timeout`.
/// A call that overruns is abandoned, not interrupted.
pub(crate) async fn call_provider<T, F>(
    name: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(call);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(EngineError::ProviderUnavailable(format!("{name}: {err:#}"))),
        Ok(Err(join_err)) => Err(EngineError::ProviderUnavailable(format!(
            "{name}: {:#}",
            anyhow!(join_err)
        ))),
        Err(_) => Err(EngineError::ProviderUnavailable(format!(
            "{name}: no reading within {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Returns `false` once the coordinator has gone away.
pub(crate) fn emit(tx: &mpsc::Sender<Signal>, signal: Signal) -> bool {
    match tx.try_send(signal) {
        Ok(()) => true,
        Err(TrySendError::Full(signal)) => {
            log_debug!(
                "{} signal queue full, dropping tick at {}",
                signal.channel().as_str(),
                signal.timestamp
            );
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
