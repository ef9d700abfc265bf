use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::models::DistractionEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("sync queue is full")]
    Full,
    #[error("sync queue is closed")]
    Closed,
}

/// Producer side of the bounded queue from the coordinator to the drainer.
/// Each message carries the full current record, never a delta.
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::Sender<DistractionEvent>,
}

impl SyncQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DistractionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Never waits; a full queue is reported back to the caller.
    pub fn try_enqueue(&self, record: &DistractionEvent) -> Result<(), EnqueueError> {
        self.tx.try_send(record.clone()).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Waits for capacity. Only used while a session is shutting down.
    pub async fn enqueue(&self, record: &DistractionEvent) -> Result<(), EnqueueError> {
        self.tx
            .send(record.clone())
            .await
            .map_err(|_| EnqueueError::Closed)
    }
}
