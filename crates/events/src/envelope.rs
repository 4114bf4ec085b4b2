use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::TrackedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Chain,
    Lightning,
}

/// Resume cursor of the stream an event came from: a block number for the
/// chain, an add/settle index for the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPosition {
    pub source: EventSource,
    pub cursor: u64,
}

/// Unit carried on the dispatch channel.
///
/// `attempt` counts deliveries of this envelope to the dispatcher, starting
/// at 1; a retryable failure re-enqueues the envelope with the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEnvelope {
    event: TrackedEvent,
    position: Option<StreamPosition>,
    attempt: u32,
    received_at: DateTime<Utc>,
}

impl TrackedEnvelope {
    pub fn new(event: TrackedEvent) -> Self {
        Self {
            event,
            position: None,
            attempt: 1,
            received_at: Utc::now(),
        }
    }

    pub fn with_position(mut self, position: StreamPosition) -> Self {
        self.position = Some(position);
        self
    }

    pub fn event(&self) -> &TrackedEvent {
        &self.event
    }

    pub fn position(&self) -> Option<StreamPosition> {
        self.position
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }

    pub fn into_event(self) -> TrackedEvent {
        self.event
    }
}

impl From<TrackedEvent> for TrackedEnvelope {
    fn from(event: TrackedEvent) -> Self {
        Self::new(event)
    }
}
