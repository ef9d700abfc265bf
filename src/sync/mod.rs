pub mod backoff;
pub mod drainer;
pub mod queue;

pub use backoff::BackoffPolicy;
pub use drainer::SyncDrainer;
pub use queue::{EnqueueError, SyncQueue};
