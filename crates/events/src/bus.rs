//! Channel between event sources and the dispatcher.
//!
//! Sources hold a [`TrackedSender`]; dispatch workers share one
//! [`TrackedReceiver`]. Delivery is at-least-once: the dispatcher is
//! idempotent on event id, so sources may resend after a restart.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::envelope::TrackedEnvelope;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    #[error("dispatch channel closed")]
    Closed,
}

/// Bounded channel; senders wait when `capacity` envelopes are queued.
pub fn channel(capacity: usize) -> (TrackedSender, TrackedReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        TrackedSender { tx },
        TrackedReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Debug, Clone)]
pub struct TrackedSender {
    tx: mpsc::Sender<TrackedEnvelope>,
}

impl TrackedSender {
    pub async fn send(&self, envelope: impl Into<TrackedEnvelope>) -> Result<(), BusError> {
        self.tx.send(envelope.into()).await.map_err(|_| BusError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Cloneable receiving end. Clones compete for envelopes; each envelope is
/// handed to exactly one of them.
#[derive(Debug, Clone)]
pub struct TrackedReceiver {
    rx: Arc<Mutex<mpsc::Receiver<TrackedEnvelope>>>,
}

impl TrackedReceiver {
    /// Next envelope, or `None` once every sender is dropped and the queue
    /// is drained.
    pub async fn recv(&self) -> Option<TrackedEnvelope> {
        self.rx.lock().await.recv().await
    }
}
