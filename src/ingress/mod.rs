//! Normalized event ingress.
//!
//! The engine does not host forge webhooks itself; an upstream normalizer
//! delivers events already keyed by MR. This module defines the event model,
//! assigns receipt order, synthesizes `command_invoked` events from notes
//! that match the command grammar, and suppresses duplicates.

mod dedupe;

pub use dedupe::DedupeSet;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::commands::{parse_command, Command};
use crate::types::MrId;

/// The kinds of events the engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MrUpdated,
    MrNoteAdded,
    PipelineStateChanged,
    CommandInvoked,
    TimerTick,
}

/// Event payloads, tagged by kind on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    MrUpdated,
    MrNoteAdded { author: String, body: String },
    PipelineStateChanged { status: String },
    CommandInvoked { command: Command },
    TimerTick,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::MrUpdated => EventKind::MrUpdated,
            EventPayload::MrNoteAdded { .. } => EventKind::MrNoteAdded,
            EventPayload::PipelineStateChanged { .. } => EventKind::PipelineStateChanged,
            EventPayload::CommandInvoked { .. } => EventKind::CommandInvoked,
            EventPayload::TimerTick => EventKind::TimerTick,
        }
    }

    /// Stable content hash used for duplicate suppression.
    pub fn content_hash(&self) -> String {
        let serialized = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&serialized);
        hex::encode(digest)
    }
}

/// A normalized event addressed to one MR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub mr_id: MrId,
    pub payload: EventPayload,
    pub received_at: DateTime<Utc>,
    /// Receipt sequence number; strictly increasing across the process.
    pub seq: u64,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// The wire form delivered by the normalizer: no receipt metadata yet.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IncomingEvent {
    pub mr_id: MrId,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Stamps incoming events with receipt order and rewrites command notes.
///
/// Receipt order is a process-wide sequence; events for the same MR are
/// handed to the registry in `seq` order.
pub struct EventIntake {
    seq: AtomicU64,
    dedupe: DedupeSet,
    bot_handle: String,
}

impl EventIntake {
    pub fn new(bot_handle: impl Into<String>, dedupe_ttl: std::time::Duration) -> Self {
        EventIntake {
            seq: AtomicU64::new(0),
            dedupe: DedupeSet::new(dedupe_ttl),
            bot_handle: bot_handle.into(),
        }
    }

    /// Normalizes one incoming event.
    ///
    /// Returns `None` when the event is a duplicate within the dedupe window.
    /// A note whose body parses as a bot command becomes a `CommandInvoked`
    /// event; notes authored by the bot itself are dropped (the bot must not
    /// react to its own comments).
    pub fn accept(&self, incoming: IncomingEvent) -> Option<Event> {
        let payload = match incoming.payload {
            EventPayload::MrNoteAdded { author, body } => {
                if author == self.bot_handle {
                    return None;
                }
                match parse_command(&body, &self.bot_handle) {
                    Some(command) => EventPayload::CommandInvoked { command },
                    None => EventPayload::MrNoteAdded { author, body },
                }
            }
            other => other,
        };

        let key = (incoming.mr_id, payload.kind(), payload.content_hash());
        if !self.dedupe.insert_if_new(key) {
            tracing::debug!(mr = %incoming.mr_id, kind = ?payload.kind(), "Dropping duplicate event");
            return None;
        }

        Some(Event {
            mr_id: incoming.mr_id,
            payload,
            received_at: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        })
    }

    /// Builds a timer tick for periodic reconciliation. Ticks bypass dedupe.
    pub fn timer_tick(&self, mr_id: MrId) -> Event {
        Event {
            mr_id,
            payload: EventPayload::TimerTick,
            received_at: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        }
    }
}
