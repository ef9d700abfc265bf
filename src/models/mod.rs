pub mod event;
pub mod session;
pub mod signal;

pub use event::{
    ApplicationCategory, Channel, ChannelSnapshot, DistractionEvent, Enrichment, EventStatus,
    GazeSnapshot, SyncState, WindowSnapshot,
};
pub use session::{ChannelSummary, SessionStatus, SessionSummary};
pub use signal::Signal;
