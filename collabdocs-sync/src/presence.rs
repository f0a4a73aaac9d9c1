//! Presence aggregation: who is here, where their cursor is, who is typing.
//!
//! ## Architecture
//!
//! ```text
//! Local selection / edit
//!       │
//!       ▼
//! PresenceAggregator::local_change()   (typing = true, arm idle timer)
//!       │                         │
//!       ▼                         ▼
//! PresencePayload ──► wire    folded into own records
//!
//! Inbound PresencePayload ──► receive() ──► records (keyed by name)
//!
//! visible(now):  last_seen      < liveness   (7s)
//!   is_typing:   last_typing_at < freshness  (1.8s)
//! ```
//!
//! There is no leave message; a participant disappears when their
//! presence goes stale. Records are never removed by a query, only
//! filtered, so a late presence brings the collaborator straight back.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::protocol::{CursorRange, PresencePayload};

/// Collaborator colours.
pub const PALETTE: [&str; 5] = ["#8B93FF", "#FF8BA7", "#6DDCBD", "#FBBF77", "#C4A1FF"];

/// Stable colour for a display name.
///
/// Classic 31-multiplier string hash over UTF-16 code units with 32-bit
/// wrapping, so every client picks the same colour for the same name.
pub fn color_for_name(name: &str) -> &'static str {
    let mut hash: i32 = 0;
    for unit in name.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(unit as i32);
    }
    PALETTE[(hash.unsigned_abs() as usize) % PALETTE.len()]
}

#[derive(Debug, Clone)]
struct PresenceRecord {
    color: String,
    cursor: Option<CursorRange>,
    last_seen: Instant,
    last_typing_at: Option<Instant>,
}

/// One row of the collaborator list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collaborator {
    pub name: String,
    pub color: String,
    pub is_typing: bool,
    pub cursor: Option<CursorRange>,
    pub is_local: bool,
}

/// Liveness- and typing-decayed view of every known participant.
#[derive(Debug)]
pub struct PresenceAggregator {
    records: HashMap<String, PresenceRecord>,
    local: Option<PresencePayload>,
    liveness: Duration,
    typing_freshness: Duration,
}

impl PresenceAggregator {
    pub fn new(liveness: Duration, typing_freshness: Duration) -> Self {
        Self {
            records: HashMap::new(),
            local: None,
            liveness,
            typing_freshness,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.presence_liveness, config.typing_freshness)
    }

    /// Set (or change) the local participant's display name.
    ///
    /// The local record exists from this point on, before any round trip.
    pub fn set_identity(&mut self, name: &str, now: Instant) {
        let cursor = self.local.as_ref().and_then(|p| p.cursor);
        if let Some(previous) = &self.local {
            if previous.name != name {
                self.records.remove(&previous.name);
            }
        }
        let local = PresencePayload {
            name: name.to_string(),
            color: color_for_name(name).to_string(),
            typing: false,
            cursor,
        };
        self.receive(&local, now);
        self.local = Some(local);
    }

    /// The local participant's current presence.
    pub fn local(&self) -> Option<&PresencePayload> {
        self.local.as_ref()
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local.as_ref().map(|p| p.name.as_str())
    }

    /// Local selection or content change.
    ///
    /// Marks the local participant as typing and returns the payload to
    /// broadcast. `None` without an identity. The caller (re)arms the idle
    /// timer.
    pub fn local_change(&mut self, cursor: CursorRange, now: Instant) -> Option<PresencePayload> {
        let local = self.local.as_mut()?;
        local.typing = true;
        local.cursor = Some(cursor);
        let payload = local.clone();
        self.receive(&payload, now);
        Some(payload)
    }

    /// Idle timer fired: typing goes back to false.
    ///
    /// Returns the follow-up payload exactly once per typing burst.
    pub fn typing_idle(&mut self, now: Instant) -> Option<PresencePayload> {
        let local = self.local.as_mut()?;
        if !local.typing {
            return None;
        }
        local.typing = false;
        let payload = local.clone();
        self.receive(&payload, now);
        Some(payload)
    }

    /// Upsert a record from a presence event.
    pub fn receive(&mut self, payload: &PresencePayload, now: Instant) {
        let record = self
            .records
            .entry(payload.name.clone())
            .or_insert_with(|| PresenceRecord {
                color: payload.color.clone(),
                cursor: None,
                last_seen: now,
                last_typing_at: None,
            });
        record.color = payload.color.clone();
        record.cursor = payload.cursor;
        record.last_seen = now;
        record.last_typing_at = if payload.typing { Some(now) } else { None };
    }

    fn is_live(&self, record: &PresenceRecord, now: Instant) -> bool {
        now.saturating_duration_since(record.last_seen) < self.liveness
    }

    fn is_typing(&self, record: &PresenceRecord, now: Instant) -> bool {
        record
            .last_typing_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.typing_freshness)
    }

    /// Collaborators to show right now, sorted by name.
    ///
    /// Falls back to just the local participant when nobody is live.
    pub fn visible(&self, now: Instant) -> Vec<Collaborator> {
        let local_name = self.local_name();
        let mut list: Vec<Collaborator> = self
            .records
            .iter()
            .filter(|(_, record)| self.is_live(record, now))
            .map(|(name, record)| Collaborator {
                name: name.clone(),
                color: record.color.clone(),
                is_typing: self.is_typing(record, now),
                cursor: record.cursor,
                is_local: Some(name.as_str()) == local_name,
            })
            .collect();

        if list.is_empty() {
            if let Some(local) = &self.local {
                list.push(Collaborator {
                    name: local.name.clone(),
                    color: local.color.clone(),
                    is_typing: false,
                    cursor: local.cursor,
                    is_local: true,
                });
            }
        }

        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Other participants currently typing.
    pub fn typing_collaborators(&self, now: Instant) -> Vec<Collaborator> {
        self.visible(now)
            .into_iter()
            .filter(|c| c.is_typing && !c.is_local)
            .collect()
    }

    /// Drop records that are no longer visible. Returns how many went.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.records.len();
        let liveness = self.liveness;
        self.records
            .retain(|_, record| now.saturating_duration_since(record.last_seen) < liveness);
        before - self.records.len()
    }

    /// Records held, visible or not.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}
