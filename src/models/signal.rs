use chrono::{DateTime, Utc};

use super::event::{Channel, ChannelSnapshot};

/// One sampler tick, distracted or not. Samplers emit on every tick and
/// leave edge detection to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub distracted: bool,
    pub reason: String,
    pub snapshot: ChannelSnapshot,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn channel(&self) -> Channel {
        self.snapshot.channel()
    }
}
