//! Distraction event record.
//!
//! The serde form of [`DistractionEvent`] is the persisted record shape:
//! the outbox stores it and the remote store receives it verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Gaze,
    Window,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Gaze, Channel::Window];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Gaze => "gaze",
            Channel::Window => "window",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Synced,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationCategory {
    Game,
    Streaming,
    Messaging,
    SocialMedia,
    Productivity,
    Browser,
    Entertainment,
    News,
    Shopping,
    Education,
    Development,
    Other,
}

impl ApplicationCategory {
    /// Lenient parse of classifier output; anything unrecognised is `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "game" => Self::Game,
            "streaming" => Self::Streaming,
            "messaging" => Self::Messaging,
            "social_media" => Self::SocialMedia,
            "productivity" => Self::Productivity,
            "browser" => Self::Browser,
            "entertainment" => Self::Entertainment,
            "news" => Self::News,
            "shopping" => Self::Shopping,
            "education" => Self::Education,
            "development" => Self::Development,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GazeSnapshot {
    pub x: f64,
    pub y: f64,
    pub tracking_valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowSnapshot {
    pub title: String,
    pub process_name: String,
    pub process_id: u32,
    #[serde(default)]
    pub window_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelSnapshot {
    Gaze(GazeSnapshot),
    Window(WindowSnapshot),
}

impl ChannelSnapshot {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelSnapshot::Gaze(_) => Channel::Gaze,
            ChannelSnapshot::Window(_) => Channel::Window,
        }
    }

    pub fn as_window(&self) -> Option<&WindowSnapshot> {
        match self {
            ChannelSnapshot::Window(window) => Some(window),
            ChannelSnapshot::Gaze(_) => None,
        }
    }
}

/// Classifier verdict attached to a window event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Enrichment {
    pub category: ApplicationCategory,
    pub confidence: f64,
    pub reasoning: String,
    pub suggested_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistractionEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub channel: Channel,
    pub status: EventStatus,
    pub reason: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub channel_snapshot: ChannelSnapshot,
    pub enrichment: Option<Enrichment>,
    pub sync_state: SyncState,
    pub retry_count: u32,
    /// Bumped by every patch that must reach the remote store.
    pub revision: u64,
}

impl DistractionEvent {
    pub fn new(
        session_id: Uuid,
        user_id: Option<String>,
        reason: String,
        start_time: DateTime<Utc>,
        channel_snapshot: ChannelSnapshot,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            user_id,
            channel: channel_snapshot.channel(),
            status: EventStatus::Active,
            reason,
            start_time,
            end_time: None,
            channel_snapshot,
            enrichment: None,
            sync_state: SyncState::Pending,
            retry_count: 0,
            revision: 1,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Returns a resolved copy, or `None` if this event is already resolved.
    /// `end_time` is clamped so it never precedes `start_time`.
    pub fn resolved_at(&self, end_time: DateTime<Utc>) -> Option<Self> {
        if !self.is_active() {
            return None;
        }
        let mut next = self.clone();
        next.status = EventStatus::Resolved;
        next.end_time = Some(end_time.max(self.start_time));
        next.sync_state = SyncState::Pending;
        next.revision += 1;
        Some(next)
    }

    /// Returns an enriched copy, or `None` when enrichment does not apply
    /// (gaze event, or already enriched).
    pub fn enriched_with(&self, enrichment: Enrichment) -> Option<Self> {
        if self.channel != Channel::Window || self.enrichment.is_some() {
            return None;
        }
        let mut next = self.clone();
        next.enrichment = Some(enrichment);
        next.sync_state = SyncState::Pending;
        next.revision += 1;
        Some(next)
    }

    /// Copy with fresh reason and snapshot. Not an update that has to be
    /// re-delivered, so revision and sync state are untouched.
    pub fn refreshed(&self, reason: &str, snapshot: &ChannelSnapshot) -> Self {
        let mut next = self.clone();
        next.reason = reason.to_string();
        next.channel_snapshot = snapshot.clone();
        next
    }
}
