use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    models::{ChannelSnapshot, Signal, WindowSnapshot},
    providers::WindowProvider,
};

use super::{call_provider, emit};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Blacklists lowercased once so each tick only lowercases the window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRules {
    apps: Vec<String>,
    keywords: Vec<String>,
}

impl WindowRules {
    pub fn new<A, K>(apps: A, keywords: K) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        Self {
            apps: apps.into_iter().map(|a| a.as_ref().to_lowercase()).collect(),
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.blacklisted_apps, &config.blacklisted_keywords)
    }
}

/// Blacklisted process names match exactly, keywords match anywhere in
/// the title; both ignore case.
pub fn classify_window(window: &WindowSnapshot, rules: &WindowRules) -> (bool, String) {
    let process = window.process_name.to_lowercase();
    if rules.apps.iter().any(|app| *app == process) {
        return (true, format!("blacklisted app: {}", window.process_name));
    }

    let title = window.title.to_lowercase();
    if let Some(keyword) = rules.keywords.iter().find(|kw| title.contains(kw.as_str())) {
        return (
            true,
            format!("blacklisted keyword '{keyword}' in title: {}", window.title),
        );
    }

    (false, format!("allowed window: {}", window.process_name))
}

pub struct WindowSampler {
    pub provider: Arc<dyn WindowProvider>,
    pub rules: WindowRules,
    pub period: Duration,
    pub provider_timeout: Duration,
}

impl WindowSampler {
    pub async fn run(self, tx: mpsc::Sender<Signal>, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut degraded = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let timestamp = Utc::now();
                    let provider = Arc::clone(&self.provider);
                    let window = match call_provider("window", self.provider_timeout, move || provider.current_window()).await {
                        Ok(window) => {
                            degraded = false;
                            window
                        }
                        Err(err) => {
                            if !degraded {
                                log_warn!("{err}; skipping window ticks until it recovers");
                                degraded = true;
                            }
                            continue;
                        }
                    };

                    let (distracted, reason) = classify_window(&window, &self.rules);
                    let signal = Signal {
                        distracted,
                        reason,
                        snapshot: ChannelSnapshot::Window(window),
                        timestamp,
                    };
                    if !emit(&tx, signal) {
                        log_debug!("coordinator gone, window sampler exiting");
                        break;
                    }
                }
                _ = cancel_token.cancelled() => {
                    log_info!("window sampler shutting down");
                    break;
                }
            }
        }
    }
}
