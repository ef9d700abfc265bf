use std::{collections::BTreeSet, fs, path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

fn default_blacklisted_apps() -> BTreeSet<String> {
    [
        "chrome.exe",
        "firefox.exe",
        "edge.exe",
        "discord.exe",
        "slack.exe",
        "telegram.exe",
        "whatsapp.exe",
        "spotify.exe",
        "youtube.exe",
        "netflix.exe",
        "steam.exe",
        "minecraft.exe",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_blacklisted_keywords() -> BTreeSet<String> {
    [
        "youtube",
        "facebook",
        "twitter",
        "instagram",
        "tiktok",
        "reddit",
        "discord",
        "slack",
        "netflix",
        "spotify",
        "gaming",
        "game",
        "entertainment",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Tracking configuration for one session.
///
/// Deserialized with per-field defaults, then checked once by
/// [`EngineConfig::validate`]. A session never re-reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub gaze_threshold_y: f64,
    pub gaze_threshold_x_min: f64,
    pub gaze_threshold_x_max: f64,
    pub distraction_timeout_seconds: f64,
    pub blacklisted_apps: BTreeSet<String>,
    pub blacklisted_keywords: BTreeSet<String>,
    pub assessment_enabled: bool,
    pub gaze_sample_rate_hz: f64,
    pub window_poll_interval_seconds: f64,

    pub calibration_min_points: usize,
    pub classifier_timeout_seconds: f64,
    pub provider_timeout_seconds: f64,
    pub sync_collection: String,
    pub sync_initial_backoff_seconds: f64,
    pub sync_max_backoff_seconds: f64,
    pub sync_poll_interval_seconds: f64,
    pub signal_queue_capacity: usize,
    pub sync_queue_capacity: usize,
    pub user_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gaze_threshold_y: 0.8,
            gaze_threshold_x_min: 0.1,
            gaze_threshold_x_max: 0.9,
            distraction_timeout_seconds: 2.0,
            blacklisted_apps: default_blacklisted_apps(),
            blacklisted_keywords: default_blacklisted_keywords(),
            assessment_enabled: false,
            gaze_sample_rate_hz: 30.0,
            window_poll_interval_seconds: 1.0,
            calibration_min_points: 5,
            classifier_timeout_seconds: 5.0,
            provider_timeout_seconds: 0.5,
            sync_collection: "distractions".into(),
            sync_initial_backoff_seconds: 1.0,
            sync_max_backoff_seconds: 60.0,
            sync_poll_interval_seconds: 0.25,
            signal_queue_capacity: 64,
            sync_queue_capacity: 256,
            user_id: None,
        }
    }
}

fn unit_open(field: &'static str, value: f64) -> EngineResult<()> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(EngineError::config(
            field,
            format!("must be within (0, 1), got {value}"),
        ))
    }
}

/// Longest duration any setting may express: one day.
const MAX_SECONDS: f64 = 86_400.0;
/// Shortest loop period; tokio intervals reject a zero period.
const MIN_PERIOD_SECONDS: f64 = 0.001;

fn seconds(field: &'static str, value: f64) -> EngineResult<()> {
    if value.is_finite() && value > 0.0 && value <= MAX_SECONDS {
        Ok(())
    } else {
        Err(EngineError::config(
            field,
            format!("must be within (0, {MAX_SECONDS}] seconds, got {value}"),
        ))
    }
}

fn period(field: &'static str, value: f64) -> EngineResult<()> {
    if value.is_finite() && (MIN_PERIOD_SECONDS..=MAX_SECONDS).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::config(
            field,
            format!("must be within [{MIN_PERIOD_SECONDS}, {MAX_SECONDS}] seconds, got {value}"),
        ))
    }
}

fn rate_hz(field: &'static str, value: f64) -> EngineResult<()> {
    let (min, max) = (1.0 / MAX_SECONDS, 1.0 / MIN_PERIOD_SECONDS);
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::config(
            field,
            format!("must be within [{min}, {max}] Hz, got {value}"),
        ))
    }
}

fn at_least(field: &'static str, value: usize, min: usize) -> EngineResult<()> {
    if value >= min {
        Ok(())
    } else {
        Err(EngineError::config(
            field,
            format!("must be at least {min}, got {value}"),
        ))
    }
}

impl EngineConfig {
    /// Reads a JSON config file. A missing file yields the defaults; a file
    /// that exists but does not parse is a hard error.
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&contents).map_err(|err| {
            EngineError::config("<file>", format!("{}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        unit_open("gaze_threshold_y", self.gaze_threshold_y)?;
        unit_open("gaze_threshold_x_min", self.gaze_threshold_x_min)?;
        unit_open("gaze_threshold_x_max", self.gaze_threshold_x_max)?;
        if self.gaze_threshold_x_min >= self.gaze_threshold_x_max {
            return Err(EngineError::config(
                "gaze_threshold_x_min",
                format!(
                    "must be below gaze_threshold_x_max ({} >= {})",
                    self.gaze_threshold_x_min, self.gaze_threshold_x_max
                ),
            ));
        }

        seconds("distraction_timeout_seconds", self.distraction_timeout_seconds)?;
        rate_hz("gaze_sample_rate_hz", self.gaze_sample_rate_hz)?;
        period("window_poll_interval_seconds", self.window_poll_interval_seconds)?;
        seconds("classifier_timeout_seconds", self.classifier_timeout_seconds)?;
        seconds("provider_timeout_seconds", self.provider_timeout_seconds)?;
        seconds("sync_initial_backoff_seconds", self.sync_initial_backoff_seconds)?;
        seconds("sync_max_backoff_seconds", self.sync_max_backoff_seconds)?;
        period("sync_poll_interval_seconds", self.sync_poll_interval_seconds)?;
        if self.sync_initial_backoff_seconds > self.sync_max_backoff_seconds {
            return Err(EngineError::config(
                "sync_initial_backoff_seconds",
                "must not exceed sync_max_backoff_seconds",
            ));
        }

        at_least("calibration_min_points", self.calibration_min_points, 3)?;
        at_least("signal_queue_capacity", self.signal_queue_capacity, 1)?;
        at_least("sync_queue_capacity", self.sync_queue_capacity, 1)?;

        if self.sync_collection.trim().is_empty() {
            return Err(EngineError::config("sync_collection", "must not be empty"));
        }
        if self.blacklisted_apps.iter().any(|app| app.trim().is_empty()) {
            return Err(EngineError::config("blacklisted_apps", "contains an empty entry"));
        }
        if self
            .blacklisted_keywords
            .iter()
            .any(|keyword| keyword.trim().is_empty())
        {
            return Err(EngineError::config(
                "blacklisted_keywords",
                "contains an empty entry",
            ));
        }

        Ok(())
    }

    pub fn distraction_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.distraction_timeout_seconds * 1000.0).round() as i64)
    }

    pub fn gaze_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.gaze_sample_rate_hz)
    }

    pub fn window_period(&self) -> Duration {
        Duration::from_secs_f64(self.window_poll_interval_seconds)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.classifier_timeout_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.provider_timeout_seconds)
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sync_poll_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_threshold_outside_unit_interval() {
        let config = EngineConfig {
            gaze_threshold_y: 1.2,
            ..EngineConfig::default()
        };
        match config.validate() {
            Err(EngineError::ConfigInvalid { field, .. }) => assert_eq!(field, "gaze_threshold_y"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn rejects_inverted_horizontal_band() {
        let config = EngineConfig {
            gaze_threshold_x_min: 0.7,
            gaze_threshold_x_max: 0.3,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::ConfigInvalid {
                field: "gaze_threshold_x_min",
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let config = EngineConfig {
            distraction_timeout_seconds: 0.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::ConfigInvalid {
                field: "distraction_timeout_seconds",
                ..
            })
        ));
    }

    #[test]
    fn rejects_durations_that_cannot_be_represented() {
        let cases = [
            (
                "window_poll_interval_seconds",
                EngineConfig {
                    window_poll_interval_seconds: 1e300,
                    ..EngineConfig::default()
                },
            ),
            (
                "gaze_sample_rate_hz",
                EngineConfig {
                    gaze_sample_rate_hz: 1e-300,
                    ..EngineConfig::default()
                },
            ),
            (
                "distraction_timeout_seconds",
                EngineConfig {
                    distraction_timeout_seconds: 1e17,
                    ..EngineConfig::default()
                },
            ),
            (
                "sync_poll_interval_seconds",
                EngineConfig {
                    sync_poll_interval_seconds: 1e-12,
                    ..EngineConfig::default()
                },
            ),
        ];

        for (expected, config) in cases {
            match config.validate() {
                Err(EngineError::ConfigInvalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("{expected}: unexpected result {other:?}"),
            }
        }
    }

    #[test]
    fn accepted_bounds_build_durations() {
        let config = EngineConfig {
            window_poll_interval_seconds: MAX_SECONDS,
            gaze_sample_rate_hz: 1.0 / MIN_PERIOD_SECONDS,
            distraction_timeout_seconds: MAX_SECONDS,
            sync_max_backoff_seconds: MAX_SECONDS,
            ..EngineConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.window_period(), Duration::from_secs(86_400));
        assert_eq!(config.distraction_timeout(), chrono::Duration::days(1));
        assert!(config.gaze_period() >= Duration::from_micros(999));
    }

    #[test]
    fn load_merges_partial_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("distraction_config.json");
        fs::write(
            &path,
            r#"{ "gaze_threshold_y": 0.9, "blacklisted_keywords": ["youtube"] }"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.gaze_threshold_y, 0.9);
        assert_eq!(config.blacklisted_keywords.len(), 1);
        assert_eq!(config.gaze_threshold_x_min, 0.1);
        assert_eq!(config.sync_collection, "distractions");
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn load_reports_invalid_values_by_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "window_poll_interval_seconds": -1 }"#).unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("window_poll_interval_seconds"));
    }
}
