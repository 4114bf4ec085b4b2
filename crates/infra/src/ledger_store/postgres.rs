//! Postgres-backed ledger.
//!
//! ## Error mapping
//!
//! | SQLx error | Code | LedgerStoreError |
//! |------------|------|------------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | any | `Storage` |
//! | PoolClosed / other | n/a | `Storage` |
//! | Row decode | n/a | `Serialization` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;

use keepsats_accounting::{Account, ConversionSnapshot, Currency, GroupId, LedgerEntry, LedgerType, OpRef};
use keepsats_core::{CustomerId, EntryId};

use super::query::LedgerQuery;
use super::{LedgerStore, LedgerStoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_entries (
    entry_id      UUID PRIMARY KEY,
    cust_id       TEXT NOT NULL,
    ledger_type   TEXT NOT NULL,
    group_id      TEXT NOT NULL,
    timestamp     TIMESTAMPTZ NOT NULL,
    op            JSONB NOT NULL,
    description   TEXT NOT NULL,
    debit         JSONB NOT NULL,
    debit_unit    TEXT NOT NULL,
    debit_amount  NUMERIC NOT NULL CHECK (debit_amount > 0),
    debit_conv    JSONB NOT NULL,
    credit        JSONB NOT NULL,
    credit_unit   TEXT NOT NULL,
    credit_amount NUMERIC NOT NULL CHECK (credit_amount > 0),
    credit_conv   JSONB NOT NULL,
    reversed      TIMESTAMPTZ NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT ledger_entries_group_type UNIQUE (group_id, ledger_type),
    CONSTRAINT ledger_entries_balanced CHECK (
        debit_unit = credit_unit AND debit_amount = credit_amount
    )
);
CREATE INDEX IF NOT EXISTS ledger_entries_cust_id ON ledger_entries (cust_id);
CREATE INDEX IF NOT EXISTS ledger_entries_timestamp ON ledger_entries (timestamp);
CREATE INDEX IF NOT EXISTS ledger_entries_group_id ON ledger_entries (group_id);
"#;

const COLUMNS: &str = "entry_id, cust_id, ledger_type, group_id, timestamp, op, description, \
    debit, debit_unit, debit_amount, debit_conv, \
    credit, credit_unit, credit_amount, credit_conv, reversed";

/// Debit and credit sums for one account key and unit, over every row.
const ACCOUNT_TOTALS: &str = r#"
SELECT
    COALESCE(SUM(debit_amount) FILTER (
        WHERE debit->>'account_type' = $1 AND debit->>'name' = $2 AND debit->>'sub' = $3 AND debit_unit = $4
    ), 0) AS debits,
    COALESCE(SUM(credit_amount) FILTER (
        WHERE credit->>'account_type' = $1 AND credit->>'name' = $2 AND credit->>'sub' = $3 AND credit_unit = $4
    ), 0) AS credits
FROM ledger_entries
WHERE debit->>'sub' = $3 OR credit->>'sub' = $3
"#;

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create the table and indexes if they are missing.
    pub async fn migrate(&self) -> Result<(), LedgerStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch(
        &self,
        operation: &str,
        mut builder: QueryBuilder<'_, Postgres>,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let rows = builder
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(entry_from_row).collect()
    }
}

fn select() -> QueryBuilder<'static, Postgres> {
    QueryBuilder::new(format!("SELECT {COLUMNS} FROM ledger_entries"))
}

fn push_insert(builder: &mut QueryBuilder<'_, Postgres>, entries: &[LedgerEntry]) {
    builder.push(format!("INSERT INTO ledger_entries ({COLUMNS}) "));
    builder.push_values(entries, |mut b, e| {
        b.push_bind(*e.entry_id.as_uuid())
            .push_bind(e.cust_id.as_str().to_string())
            .push_bind(e.ledger_type.as_str())
            .push_bind(e.group_id.as_str().to_string())
            .push_bind(e.timestamp)
            .push_bind(Json(e.op.clone()))
            .push_bind(e.description.clone())
            .push_bind(Json(e.debit.clone()))
            .push_bind(e.debit_unit.as_str())
            .push_bind(e.debit_amount)
            .push_bind(Json(e.debit_conv.clone()))
            .push_bind(Json(e.credit.clone()))
            .push_bind(e.credit_unit.as_str())
            .push_bind(e.credit_amount)
            .push_bind(Json(e.credit_conv.clone()))
            .push_bind(e.reversed);
    });
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, entry), fields(group_id = %entry.group_id, ledger_type = %entry.ledger_type), err)]
    async fn insert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
        self.insert_batch(std::slice::from_ref(entry)).await
    }

    #[instrument(skip(self, entries), fields(count = entries.len()), err)]
    async fn insert_batch(&self, entries: &[LedgerEntry]) -> Result<(), LedgerStoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in entries {
            entry.validate()?;
        }
        let mut builder = QueryBuilder::new("");
        push_insert(&mut builder, entries);
        builder.build().execute(&*self.pool).await.map_err(|e| {
            if is_unique_violation(&e) {
                duplicate_of(entries)
            } else {
                map_sqlx_error("insert_batch", e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self, entry), fields(group_id = %entry.group_id, ledger_type = %entry.ledger_type), err)]
    async fn upsert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
        entry.validate()?;
        let mut builder = QueryBuilder::new("");
        push_insert(&mut builder, std::slice::from_ref(entry));
        builder.push(
            " ON CONFLICT (group_id, ledger_type) DO UPDATE SET \
             entry_id = EXCLUDED.entry_id, cust_id = EXCLUDED.cust_id, \
             timestamp = EXCLUDED.timestamp, op = EXCLUDED.op, \
             description = EXCLUDED.description, debit = EXCLUDED.debit, \
             debit_unit = EXCLUDED.debit_unit, debit_amount = EXCLUDED.debit_amount, \
             debit_conv = EXCLUDED.debit_conv, credit = EXCLUDED.credit, \
             credit_unit = EXCLUDED.credit_unit, credit_amount = EXCLUDED.credit_amount, \
             credit_conv = EXCLUDED.credit_conv, reversed = EXCLUDED.reversed",
        );
        builder
            .build()
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("upsert", e))?;
        Ok(())
    }

    async fn get(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        let mut builder = select();
        builder.push(" WHERE entry_id = ").push_bind(*entry_id.as_uuid());
        Ok(self.fetch("get", builder).await?.into_iter().next())
    }

    async fn find_one(
        &self,
        group_id: &GroupId,
        ledger_type: LedgerType,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        let mut builder = select();
        builder
            .push(" WHERE group_id = ")
            .push_bind(group_id.as_str().to_string())
            .push(" AND ledger_type = ")
            .push_bind(ledger_type.as_str());
        Ok(self.fetch("find_one", builder).await?.into_iter().next())
    }

    async fn find_by_group(&self, group_id: &GroupId) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let mut builder = select();
        builder
            .push(" WHERE group_id = ")
            .push_bind(group_id.as_str().to_string())
            .push(" ORDER BY timestamp ASC");
        self.fetch("find_by_group", builder).await
    }

    async fn group_exists(&self, group_id: &GroupId) -> Result<bool, LedgerStoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM ledger_entries WHERE group_id = $1)")
            .bind(group_id.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("group_exists", e))?;
        row.try_get::<bool, _>(0)
            .map_err(|e| LedgerStoreError::Serialization(e.to_string()))
    }

    #[instrument(skip(self), err)]
    async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let mut builder = select();
        builder.push(" WHERE TRUE");
        if let Some(cust_id) = &query.cust_id {
            builder.push(" AND cust_id = ").push_bind(cust_id.as_str().to_string());
        }
        if let Some(sub) = &query.account_sub {
            builder
                .push(" AND (debit->>'sub' = ")
                .push_bind(sub.clone())
                .push(" OR credit->>'sub' = ")
                .push_bind(sub.clone())
                .push(")");
        }
        if let Some(group_id) = &query.group_id {
            builder.push(" AND group_id = ").push_bind(group_id.as_str().to_string());
        }
        if let Some(ledger_type) = query.ledger_type {
            builder.push(" AND ledger_type = ").push_bind(ledger_type.as_str());
        }
        if let Some(from) = query.from {
            builder.push(" AND timestamp >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            builder.push(" AND timestamp <= ").push_bind(to);
        }
        builder.push(if query.oldest_first {
            " ORDER BY timestamp ASC"
        } else {
            " ORDER BY timestamp DESC"
        });
        builder
            .push(" LIMIT ")
            .push_bind(i64::try_from(query.effective_limit()).unwrap_or(i64::MAX));
        self.fetch("query", builder).await
    }

    async fn mark_reversed(&self, entry_id: EntryId, at: DateTime<Utc>) -> Result<(), LedgerStoreError> {
        let result = sqlx::query("UPDATE ledger_entries SET reversed = $2 WHERE entry_id = $1")
            .bind(entry_id.as_uuid())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_reversed", e))?;
        if result.rows_affected() == 0 {
            return Err(LedgerStoreError::NotFound(entry_id));
        }
        Ok(())
    }

    async fn all_entries(&self) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let mut builder = select();
        builder.push(" ORDER BY timestamp ASC");
        self.fetch("all_entries", builder).await
    }

    #[instrument(skip(self), fields(account = %account), err)]
    async fn account_balance(&self, account: &Account, unit: Currency) -> Result<Decimal, LedgerStoreError> {
        let row = sqlx::query(ACCOUNT_TOTALS)
            .bind(account.account_type.as_str())
            .bind(&account.name)
            .bind(&account.sub)
            .bind(unit.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("account_balance", e))?;
        let debits: Decimal = row.try_get("debits").map_err(|e| LedgerStoreError::Serialization(e.to_string()))?;
        let credits: Decimal = row.try_get("credits").map_err(|e| LedgerStoreError::Serialization(e.to_string()))?;
        Ok(if account.is_debit_normal() { debits - credits } else { credits - debits })
    }
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, LedgerStoreError> {
    let decode = |e: sqlx::Error| LedgerStoreError::Serialization(e.to_string());
    let text = |col: &str| -> Result<String, LedgerStoreError> { row.try_get::<String, _>(col).map_err(decode) };
    let unit = |col: &str| -> Result<Currency, LedgerStoreError> {
        text(col)?
            .parse()
            .map_err(|e: keepsats_accounting::AccountingError| LedgerStoreError::Serialization(e.to_string()))
    };

    let entry = LedgerEntry {
        entry_id: EntryId::from_uuid(row.try_get("entry_id").map_err(decode)?),
        cust_id: CustomerId::parse(text("cust_id")?)?,
        ledger_type: text("ledger_type")?.parse()?,
        group_id: GroupId::new(text("group_id")?),
        timestamp: row.try_get("timestamp").map_err(decode)?,
        op: row.try_get::<Json<OpRef>, _>("op").map_err(decode)?.0,
        description: text("description")?,
        debit: row.try_get::<Json<Account>, _>("debit").map_err(decode)?.0,
        debit_unit: unit("debit_unit")?,
        debit_amount: row.try_get::<Decimal, _>("debit_amount").map_err(decode)?,
        debit_conv: row
            .try_get::<Json<ConversionSnapshot>, _>("debit_conv")
            .map_err(decode)?
            .0,
        credit: row.try_get::<Json<Account>, _>("credit").map_err(decode)?.0,
        credit_unit: unit("credit_unit")?,
        credit_amount: row.try_get::<Decimal, _>("credit_amount").map_err(decode)?,
        credit_conv: row
            .try_get::<Json<ConversionSnapshot>, _>("credit_conv")
            .map_err(decode)?
            .0,
        reversed: row.try_get("reversed").map_err(decode)?,
    };
    entry.validate()?;
    Ok(entry)
}

fn duplicate_of(entries: &[LedgerEntry]) -> LedgerStoreError {
    match entries.first() {
        Some(e) if entries.len() == 1 => LedgerStoreError::Duplicate {
            group_id: e.group_id.clone(),
            ledger_type: e.ledger_type,
        },
        Some(e) => LedgerStoreError::Duplicate {
            group_id: GroupId::new(format!("{} (batch of {})", e.group_id, entries.len())),
            ledger_type: e.ledger_type,
        },
        None => LedgerStoreError::Storage("empty batch reported a duplicate".to_string()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().is_some_and(|c| c.as_ref() == "23505"),
        _ => false,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            LedgerStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            LedgerStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            LedgerStoreError::Serialization(format!("decode error in {operation}: {err}"))
        }
        _ => LedgerStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
