pub mod outbox_entry;

pub use outbox_entry::{EnqueueOutcome, OutboxEntry};
