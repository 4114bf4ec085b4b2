use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{TrackedEventStore, TrackedRecord, TrackingStoreError};

#[derive(Debug, Default)]
pub struct InMemoryTrackedEventStore {
    records: RwLock<HashMap<String, TrackedRecord>>,
}

impl InMemoryTrackedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TrackedEventStore for InMemoryTrackedEventStore {
    async fn record(&self, record: &TrackedRecord) -> Result<(), TrackingStoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| TrackingStoreError::Storage("lock poisoned".to_string()))?;
        records
            .entry(record.event_id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn exists(&self, event_id: &str) -> Result<bool, TrackingStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| TrackingStoreError::Storage("lock poisoned".to_string()))?;
        Ok(records.contains_key(event_id))
    }

    async fn get(&self, event_id: &str) -> Result<Option<TrackedRecord>, TrackingStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| TrackingStoreError::Storage("lock poisoned".to_string()))?;
        Ok(records.get(event_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::forward_event;

    #[tokio::test]
    async fn first_record_wins() {
        let store = InMemoryTrackedEventStore::new();
        let ev = forward_event(1, 10);
        store
            .record(&TrackedRecord::new(&ev, None, "processed", 1))
            .await
            .unwrap();
        store
            .record(&TrackedRecord::new(&ev, None, "ignored", 0))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        let got = store.get(&ev.event_id()).await.unwrap().unwrap();
        assert_eq!(got.outcome, "processed");
        assert!(store.exists(&ev.event_id()).await.unwrap());
        assert!(!store.exists("other").await.unwrap());
    }
}
