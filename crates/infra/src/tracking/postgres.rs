use std::sync::Arc;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use keepsats_core::CustomerId;
use keepsats_events::TrackedEvent;

use super::{TrackedEventStore, TrackedRecord, TrackingStoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tracked_events (
    event_id     TEXT PRIMARY KEY,
    kind         TEXT NOT NULL,
    cust_id      TEXT NULL,
    outcome      TEXT NOT NULL,
    entry_count  BIGINT NOT NULL,
    processed_at TIMESTAMPTZ NOT NULL,
    event        JSONB NOT NULL
);
"#;

#[derive(Debug, Clone)]
pub struct PostgresTrackedEventStore {
    pool: Arc<PgPool>,
}

impl PostgresTrackedEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn migrate(&self) -> Result<(), TrackingStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| storage("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl TrackedEventStore for PostgresTrackedEventStore {
    async fn record(&self, record: &TrackedRecord) -> Result<(), TrackingStoreError> {
        sqlx::query(
            r#"
            INSERT INTO tracked_events (event_id, kind, cust_id, outcome, entry_count, processed_at, event)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&record.event_id)
        .bind(&record.kind)
        .bind(record.cust_id.as_ref().map(|c| c.as_str().to_string()))
        .bind(&record.outcome)
        .bind(i64::try_from(record.entry_count).unwrap_or(i64::MAX))
        .bind(record.processed_at)
        .bind(Json(&record.event))
        .execute(&*self.pool)
        .await
        .map_err(|e| storage("record", e))?;
        Ok(())
    }

    async fn exists(&self, event_id: &str) -> Result<bool, TrackingStoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM tracked_events WHERE event_id = $1)")
            .bind(event_id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| storage("exists", e))?;
        row.try_get::<bool, _>(0)
            .map_err(|e| TrackingStoreError::Serialization(e.to_string()))
    }

    async fn get(&self, event_id: &str) -> Result<Option<TrackedRecord>, TrackingStoreError> {
        let row = sqlx::query(
            r#"
            SELECT event_id, kind, cust_id, outcome, entry_count, processed_at, event
            FROM tracked_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| storage("get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| TrackingStoreError::Serialization(e.to_string());
        let cust_id = row
            .try_get::<Option<String>, _>("cust_id")
            .map_err(decode)?
            .map(CustomerId::parse)
            .transpose()
            .map_err(|e| TrackingStoreError::Serialization(e.to_string()))?;
        let entry_count: i64 = row.try_get("entry_count").map_err(decode)?;
        Ok(Some(TrackedRecord {
            event_id: row.try_get("event_id").map_err(decode)?,
            kind: row.try_get("kind").map_err(decode)?,
            cust_id,
            outcome: row.try_get("outcome").map_err(decode)?,
            entry_count: usize::try_from(entry_count).unwrap_or_default(),
            processed_at: row.try_get("processed_at").map_err(decode)?,
            event: row.try_get::<Json<TrackedEvent>, _>("event").map_err(decode)?.0,
        }))
    }
}

fn storage(operation: &str, err: sqlx::Error) -> TrackingStoreError {
    TrackingStoreError::Storage(format!("sqlx error in {operation}: {err}"))
}
