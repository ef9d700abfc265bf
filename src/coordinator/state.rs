//! Per-channel debounce and the canonical event log.
//!
//! [`DistractionTracker`] is plain synchronous state. The actor in
//! `controller.rs` is its only owner, so no locking is involved; every
//! patch swaps a whole `Arc<DistractionEvent>` and readers holding an older
//! snapshot never observe a half-applied update.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{
    Channel, ChannelSnapshot, DistractionEvent, Enrichment, Signal, SyncState,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    /// First timestamp of the current uninterrupted distracted run.
    pub pending_since: Option<DateTime<Utc>>,
    pub active_event: Option<Uuid>,
}

/// What a signal did to its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Idle,
    Pending,
    Created(Arc<DistractionEvent>),
    Refreshed,
    Resolved(Arc<DistractionEvent>),
}

pub struct DistractionTracker {
    session_id: Uuid,
    user_id: Option<String>,
    timeout: Duration,
    events: Vec<Arc<DistractionEvent>>,
    gaze: ChannelState,
    window: ChannelState,
}

impl DistractionTracker {
    pub fn new(session_id: Uuid, user_id: Option<String>, timeout: Duration) -> Self {
        Self {
            session_id,
            user_id,
            timeout,
            events: Vec::new(),
            gaze: ChannelState::default(),
            window: ChannelState::default(),
        }
    }

    /// Events ordered by `start_time`.
    pub fn events(&self) -> &[Arc<DistractionEvent>] {
        &self.events
    }

    pub fn channel_state(&self, channel: Channel) -> &ChannelState {
        match channel {
            Channel::Gaze => &self.gaze,
            Channel::Window => &self.window,
        }
    }

    fn channel_state_mut(&mut self, channel: Channel) -> &mut ChannelState {
        match channel {
            Channel::Gaze => &mut self.gaze,
            Channel::Window => &mut self.window,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Arc<DistractionEvent>> {
        self.events.iter().find(|event| event.id == id)
    }

    pub fn active(&self, channel: Channel) -> Option<&Arc<DistractionEvent>> {
        self.channel_state(channel)
            .active_event
            .and_then(|id| self.get(id))
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.events.iter().position(|event| event.id == id)
    }

    fn replace(&mut self, next: DistractionEvent) -> Arc<DistractionEvent> {
        let next = Arc::new(next);
        if let Some(index) = self.position(next.id) {
            self.events[index] = Arc::clone(&next);
        }
        next
    }

    fn insert(&mut self, event: DistractionEvent) -> Arc<DistractionEvent> {
        let event = Arc::new(event);
        let index = self
            .events
            .partition_point(|existing| existing.start_time <= event.start_time);
        self.events.insert(index, Arc::clone(&event));
        event
    }

    pub fn apply_signal(&mut self, signal: &Signal) -> Transition {
        let channel = signal.channel();
        let timeout = self.timeout;

        if let Some(active_id) = self.channel_state(channel).active_event {
            let Some(current) = self.get(active_id).cloned() else {
                // Log and state disagree; drop the dangling reference.
                self.channel_state_mut(channel).active_event = None;
                return Transition::Idle;
            };

            if signal.distracted {
                self.replace(current.refreshed(&signal.reason, &signal.snapshot));
                return Transition::Refreshed;
            }

            self.channel_state_mut(channel).active_event = None;
            return match current.resolved_at(signal.timestamp) {
                Some(resolved) => Transition::Resolved(self.replace(resolved)),
                None => Transition::Idle,
            };
        }

        if !signal.distracted {
            self.channel_state_mut(channel).pending_since = None;
            return Transition::Idle;
        }

        let state = self.channel_state_mut(channel);
        let Some(pending_since) = state.pending_since else {
            state.pending_since = Some(signal.timestamp);
            return Transition::Pending;
        };

        if signal.timestamp - pending_since < timeout {
            return Transition::Pending;
        }

        state.pending_since = None;
        let event = DistractionEvent::new(
            self.session_id,
            self.user_id.clone(),
            signal.reason.clone(),
            pending_since,
            signal.snapshot.clone(),
        );
        let created = self.insert(event);
        self.channel_state_mut(channel).active_event = Some(created.id);
        Transition::Created(created)
    }

    /// Resolves one event. Already-resolved or unknown ids return `None` and
    /// leave the log untouched.
    pub fn resolve(&mut self, id: Uuid, end_time: DateTime<Utc>) -> Option<Arc<DistractionEvent>> {
        let current = self.get(id)?.clone();
        let resolved = current.resolved_at(end_time)?;
        let state = self.channel_state_mut(current.channel);
        if state.active_event == Some(id) {
            state.active_event = None;
        }
        Some(self.replace(resolved))
    }

    /// Session termination: pending runs are dropped, active events resolve
    /// at `stop_time`.
    pub fn finalize(&mut self, stop_time: DateTime<Utc>) -> Vec<Arc<DistractionEvent>> {
        let mut resolved = Vec::new();
        for channel in Channel::ALL {
            let state = self.channel_state_mut(channel);
            state.pending_since = None;
            if let Some(id) = state.active_event {
                if let Some(event) = self.resolve(id, stop_time) {
                    resolved.push(event);
                }
            }
        }
        resolved
    }

    pub fn apply_enrichment(
        &mut self,
        id: Uuid,
        enrichment: Enrichment,
    ) -> Option<Arc<DistractionEvent>> {
        let current = self.get(id)?.clone();
        let enriched = current.enriched_with(enrichment)?;
        Some(self.replace(enriched))
    }

    /// Marks `id` synced if `revision` is still its latest revision.
    pub fn mark_synced(&mut self, id: Uuid, revision: u64) -> bool {
        let Some(current) = self.get(id).cloned() else {
            return false;
        };
        if current.revision != revision || current.sync_state == SyncState::Synced {
            return false;
        }
        let mut next = (*current).clone();
        next.sync_state = SyncState::Synced;
        self.replace(next);
        true
    }

    pub fn record_retry(&mut self, id: Uuid, retry_count: u32) {
        let Some(current) = self.get(id).cloned() else {
            return;
        };
        if current.retry_count == retry_count {
            return;
        }
        let mut next = (*current).clone();
        next.retry_count = retry_count;
        self.replace(next);
    }
}

/// Window title and process of a window event, for the enricher.
pub fn window_target(event: &DistractionEvent) -> Option<(String, String)> {
    match &event.channel_snapshot {
        ChannelSnapshot::Window(window) => {
            Some((window.title.clone(), window.process_name.clone()))
        }
        ChannelSnapshot::Gaze(_) => None,
    }
}
