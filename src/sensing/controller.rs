use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::Signal;

use super::{gaze::GazeSampler, window::WindowSampler};

/// Owns the two sampler tasks of a session.
pub struct SensingController {
    handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SensingController {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel_token.is_some()
    }

    /// `parent` lets the session tear everything down at once on drop.
    pub fn start_sensing(
        &mut self,
        gaze: GazeSampler,
        gaze_tx: mpsc::Sender<Signal>,
        window: WindowSampler,
        window_tx: mpsc::Sender<Signal>,
        parent: &CancellationToken,
    ) -> Result<()> {
        if self.is_running() {
            bail!("sensing already active");
        }

        let cancel_token = parent.child_token();
        info!(
            "starting samplers (gaze every {:?}, window every {:?})",
            gaze.period, window.period
        );
        self.handles
            .push(tokio::spawn(gaze.run(gaze_tx, cancel_token.clone())));
        self.handles
            .push(tokio::spawn(window.run(window_tx, cancel_token.clone())));
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop_sensing(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        for handle in self.handles.drain(..) {
            handle.await.context("sampler task failed to join")?;
        }
        Ok(())
    }
}

impl Default for SensingController {
    fn default() -> Self {
        Self::new()
    }
}
