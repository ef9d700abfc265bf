use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    calibration::{CalibrationProfile, Point},
    config::EngineConfig,
    models::{ChannelSnapshot, GazeSnapshot, Signal},
    providers::{GazeProvider, GazeSample},
};

use super::{call_provider, emit};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const NO_FACE_REASON: &str = "no face detected";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeThresholds {
    pub y: f64,
    pub x_min: f64,
    pub x_max: f64,
}

impl GazeThresholds {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            y: config.gaze_threshold_y,
            x_min: config.gaze_threshold_x_min,
            x_max: config.gaze_threshold_x_max,
        }
    }
}

/// Maps a raw sample through the calibration profile and decides whether
/// the user is looking away. The first matching rule names the reason.
pub fn classify_gaze(
    sample: GazeSample,
    profile: &CalibrationProfile,
    thresholds: &GazeThresholds,
) -> (bool, String, GazeSnapshot) {
    if !sample.tracking_valid {
        let snapshot = GazeSnapshot {
            x: sample.x,
            y: sample.y,
            tracking_valid: false,
        };
        return (true, NO_FACE_REASON.to_string(), snapshot);
    }

    let Point { x, y } = profile.map(Point::new(sample.x, sample.y));
    let snapshot = GazeSnapshot {
        x,
        y,
        tracking_valid: true,
    };

    if y > thresholds.y {
        (true, format!("looking down (y={y:.3}>{:.3})", thresholds.y), snapshot)
    } else if x < thresholds.x_min {
        (
            true,
            format!("looking left off-screen (x={x:.3}<{:.3})", thresholds.x_min),
            snapshot,
        )
    } else if x > thresholds.x_max {
        (
            true,
            format!("looking right off-screen (x={x:.3}>{:.3})", thresholds.x_max),
            snapshot,
        )
    } else {
        (false, format!("on screen (x={x:.3}, y={y:.3})"), snapshot)
    }
}

pub struct GazeSampler {
    pub provider: Arc<dyn GazeProvider>,
    pub profile: Arc<CalibrationProfile>,
    pub thresholds: GazeThresholds,
    pub period: Duration,
    pub provider_timeout: Duration,
}

impl GazeSampler {
    pub async fn run(self, tx: mpsc::Sender<Signal>, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut degraded = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let timestamp = Utc::now();
                    let provider = Arc::clone(&self.provider);
                    let sample = match call_provider("gaze", self.provider_timeout, move || provider.sample()).await {
                        Ok(sample) => {
                            if degraded {
                                log_info!("gaze provider recovered");
                                degraded = false;
                            }
                            sample
                        }
                        Err(err) => {
                            if !degraded {
                                log_warn!("{err}; treating gaze as untracked");
                                degraded = true;
                            }
                            GazeSample { x: 0.0, y: 0.0, tracking_valid: false }
                        }
                    };

                    let (distracted, reason, snapshot) = classify_gaze(sample, &self.profile, &self.thresholds);
                    let signal = Signal {
                        distracted,
                        reason,
                        snapshot: ChannelSnapshot::Gaze(snapshot),
                        timestamp,
                    };
                    if !emit(&tx, signal) {
                        log_debug!("coordinator gone, gaze sampler exiting");
                        break;
                    }
                }
                _ = cancel_token.cancelled() => {
                    log_info!("gaze sampler shutting down");
                    break;
                }
            }
        }
    }
}
