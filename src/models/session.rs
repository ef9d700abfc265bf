use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{Channel, DistractionEvent, EventStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Running,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "Running",
            SessionStatus::Stopped => "Stopped",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub events: usize,
    pub resolved: usize,
    pub distracted_ms: i64,
}

/// Aggregate view over a session's event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub calibrated: bool,
    pub total_events: usize,
    pub enriched_events: usize,
    pub per_channel: BTreeMap<Channel, ChannelSummary>,
}

impl SessionSummary {
    /// Active events count toward `distracted_ms` up to `now`.
    pub fn from_events(
        session_id: Uuid,
        started_at: DateTime<Utc>,
        calibrated: bool,
        events: &[DistractionEvent],
        now: DateTime<Utc>,
    ) -> Self {
        let mut per_channel: BTreeMap<Channel, ChannelSummary> = Channel::ALL
            .iter()
            .map(|channel| (*channel, ChannelSummary::default()))
            .collect();

        for event in events {
            let entry = per_channel.entry(event.channel).or_default();
            entry.events += 1;
            if event.status == EventStatus::Resolved {
                entry.resolved += 1;
            }
            let end = event.end_time.unwrap_or(now).max(event.start_time);
            entry.distracted_ms += (end - event.start_time).num_milliseconds();
        }

        Self {
            session_id,
            started_at,
            calibrated,
            total_events: events.len(),
            enriched_events: events.iter().filter(|e| e.enrichment.is_some()).count(),
            per_channel,
        }
    }
}
