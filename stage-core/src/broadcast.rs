//! Broadcast fan-out of stage events to any number of observers.
//!
//! Delivery is at-most-once per subscriber: a subscriber that falls behind
//! the channel capacity silently misses the oldest events.

use crate::state::QuoteRef;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// Everything an observer of the performance can see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    /// Lifecycle and housekeeping notices.
    System { content: String },
    /// Narration, announcements and God-Mode effects.
    StageDirection { content: String },
    /// A line spoken by an actor.
    Dialogue {
        seq: u64,
        actor: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quote: Option<QuoteRef>,
    },
    /// An actor has been asked for a turn.
    Thinking { actor: String },
    /// A previously spoken line was withdrawn.
    Revoke { seq: u64, actor: String },
    /// One actor nudged another.
    Nudge { actor: String, target: String },
    ScenarioStatus {
        is_playing: bool,
        current_index: usize,
        total_events: usize,
    },
}

impl StageEvent {
    pub fn system(content: impl Into<String>) -> Self {
        StageEvent::System {
            content: content.into(),
        }
    }

    pub fn direction(content: impl Into<String>) -> Self {
        StageEvent::StageDirection {
            content: content.into(),
        }
    }
}

/// Sending half of the stage event channel.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<StageEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns how many subscribers it reached.
    pub fn send(&self, event: StageEvent) -> usize {
        // No subscribers is not an error for a broadcast.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
