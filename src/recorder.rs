//! Event recording
//!
//! Builds visit and click records and queues them on the write buffer. The
//! caller gets the record back immediately; persistence happens later and
//! its failures never reach the request.

use chrono::Utc;
use tracing::warn;

use crate::db::{ClickEvent, EventRecord, Profile, VisitEvent, WriteSender};
use crate::location::{ResolvedLocation, VisitContext};

#[derive(Clone)]
pub struct EventRecorder {
    writer: WriteSender,
    user_agent_max_len: usize,
}

/// Attribution only for signed-in callers looking at someone else's profile
pub fn visitor_for(profile: &Profile, caller: Option<i64>) -> Option<i64> {
    caller.filter(|id| *id != profile.id)
}

/// Trim and lower-case a button tag
pub fn normalize_button(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn truncate(value: Option<&str>, max_chars: usize) -> Option<String> {
    value.map(|v| v.chars().take(max_chars).collect())
}

impl EventRecorder {
    pub fn new(writer: WriteSender, user_agent_max_len: usize) -> Self {
        Self {
            writer,
            user_agent_max_len,
        }
    }

    pub fn record_visit(
        &self,
        profile: &Profile,
        caller: Option<i64>,
        resolved: &ResolvedLocation,
        ctx: &VisitContext,
    ) -> VisitEvent {
        let event = VisitEvent {
            id: uuid::Uuid::new_v4().to_string(),
            profile_id: profile.id,
            visitor_id: visitor_for(profile, caller),
            device_ip: ctx.client_ip.clone(),
            user_agent: truncate(ctx.user_agent.as_deref(), self.user_agent_max_len),
            latitude: resolved.latitude,
            longitude: resolved.longitude,
            country: resolved.country.clone(),
            region: resolved.region.clone(),
            locality: resolved.locality.clone(),
            postal_code: resolved.postal_code.clone(),
            accuracy_score: resolved.accuracy_score,
            location_source: resolved.source,
            timestamp: Utc::now(),
        };

        self.enqueue(EventRecord::Visit(event.clone()));
        event
    }

    pub fn record_click(
        &self,
        profile: &Profile,
        caller: Option<i64>,
        button_type: &str,
        ctx: &VisitContext,
    ) -> ClickEvent {
        let event = ClickEvent {
            id: uuid::Uuid::new_v4().to_string(),
            profile_id: profile.id,
            visitor_id: visitor_for(profile, caller),
            button_type: normalize_button(button_type),
            device_ip: ctx.client_ip.clone(),
            user_agent: truncate(ctx.user_agent.as_deref(), self.user_agent_max_len),
            latitude: ctx.latitude,
            longitude: ctx.longitude,
            timestamp: Utc::now(),
        };

        self.enqueue(EventRecord::Click(event.clone()));
        event
    }

    fn enqueue(&self, record: EventRecord) {
        if self.writer.send(record).is_err() {
            warn!("Write buffer closed, analytics event dropped");
        }
    }
}
