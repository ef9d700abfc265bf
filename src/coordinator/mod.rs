pub mod controller;
pub mod state;

pub use controller::{Coordinator, EventLogSnapshot, Feedback};
pub(crate) use controller::{Control, CoordinatorChannels};
pub use state::{ChannelState, DistractionTracker, Transition};
