//! Processed-event records.
//!
//! One record per tracked event id, written after the event's ledger entries.
//! The dispatcher consults it first, so a redelivered event short-circuits
//! before taking any lock.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keepsats_core::CustomerId;
use keepsats_events::TrackedEvent;

pub use in_memory::InMemoryTrackedEventStore;
pub use postgres::PostgresTrackedEventStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRecord {
    pub event_id: String,
    pub kind: String,
    pub cust_id: Option<CustomerId>,
    /// Short outcome label, e.g. `processed` or `ignored: not for server`.
    pub outcome: String,
    pub entry_count: usize,
    pub processed_at: DateTime<Utc>,
    pub event: TrackedEvent,
}

impl TrackedRecord {
    pub fn new(
        event: &TrackedEvent,
        cust_id: Option<CustomerId>,
        outcome: impl Into<String>,
        entry_count: usize,
    ) -> Self {
        Self {
            event_id: event.event_id(),
            kind: event.kind().to_string(),
            cust_id,
            outcome: outcome.into(),
            entry_count,
            processed_at: Utc::now(),
            event: event.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackingStoreError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait TrackedEventStore: Send + Sync {
    /// Record an event as processed. Recording the same id twice keeps the
    /// first record.
    async fn record(&self, record: &TrackedRecord) -> Result<(), TrackingStoreError>;

    async fn exists(&self, event_id: &str) -> Result<bool, TrackingStoreError>;

    async fn get(&self, event_id: &str) -> Result<Option<TrackedRecord>, TrackingStoreError>;
}

#[async_trait]
impl<S> TrackedEventStore for Arc<S>
where
    S: TrackedEventStore + ?Sized,
{
    async fn record(&self, record: &TrackedRecord) -> Result<(), TrackingStoreError> {
        (**self).record(record).await
    }

    async fn exists(&self, event_id: &str) -> Result<bool, TrackingStoreError> {
        (**self).exists(event_id).await
    }

    async fn get(&self, event_id: &str) -> Result<Option<TrackedRecord>, TrackingStoreError> {
        (**self).get(event_id).await
    }
}
