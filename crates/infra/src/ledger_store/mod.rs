//! Append-only ledger persistence.
//!
//! The store is the only writer of [`LedgerEntry`] rows. It enforces at most
//! one entry per `(group_id, ledger_type)`, which is what makes re-dispatching
//! an event harmless.

pub mod in_memory;
pub mod postgres;
pub mod query;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use keepsats_accounting::{Account, Currency, GroupId, LedgerEntry, LedgerType};
use rust_decimal::Decimal;
use keepsats_core::{DomainError, EntryId};

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::LedgerQuery;

#[derive(Debug, thiserror::Error)]
pub enum LedgerStoreError {
    #[error("entry already exists for group {group_id} ({ledger_type})")]
    Duplicate {
        group_id: GroupId,
        ledger_type: LedgerType,
    },
    #[error("ledger entry not found: {0}")]
    NotFound(EntryId),
    #[error("ledger entry {0} is already reversed")]
    AlreadyReversed(EntryId),
    #[error("invalid ledger entry: {0}")]
    Invalid(#[from] DomainError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append one entry. A second entry for the same
    /// `(group_id, ledger_type)` fails with `Duplicate`.
    async fn insert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError>;

    /// Append several entries atomically: all are written or none.
    async fn insert_batch(&self, entries: &[LedgerEntry]) -> Result<(), LedgerStoreError>;

    /// Insert or replace by `(group_id, ledger_type)`. Administrative use
    /// only; the event path always goes through `insert`.
    async fn upsert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError>;

    async fn get(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, LedgerStoreError>;

    async fn find_one(
        &self,
        group_id: &GroupId,
        ledger_type: LedgerType,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError>;

    async fn find_by_group(&self, group_id: &GroupId) -> Result<Vec<LedgerEntry>, LedgerStoreError>;

    async fn group_exists(&self, group_id: &GroupId) -> Result<bool, LedgerStoreError>;

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerStoreError>;

    /// Stamp `reversed` on an entry.
    async fn mark_reversed(&self, entry_id: EntryId, at: DateTime<Utc>) -> Result<(), LedgerStoreError>;

    /// Every entry, oldest first.
    async fn all_entries(&self) -> Result<Vec<LedgerEntry>, LedgerStoreError>;

    /// Balance of `account` in `unit` over the whole history, positive on
    /// its normal side. Never truncated by [`query::MAX_LIMIT`].
    async fn account_balance(&self, account: &Account, unit: Currency) -> Result<Decimal, LedgerStoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn insert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
        (**self).insert(entry).await
    }

    async fn insert_batch(&self, entries: &[LedgerEntry]) -> Result<(), LedgerStoreError> {
        (**self).insert_batch(entries).await
    }

    async fn upsert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
        (**self).upsert(entry).await
    }

    async fn get(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        (**self).get(entry_id).await
    }

    async fn find_one(
        &self,
        group_id: &GroupId,
        ledger_type: LedgerType,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        (**self).find_one(group_id, ledger_type).await
    }

    async fn find_by_group(&self, group_id: &GroupId) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        (**self).find_by_group(group_id).await
    }

    async fn group_exists(&self, group_id: &GroupId) -> Result<bool, LedgerStoreError> {
        (**self).group_exists(group_id).await
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        (**self).query(query).await
    }

    async fn mark_reversed(&self, entry_id: EntryId, at: DateTime<Utc>) -> Result<(), LedgerStoreError> {
        (**self).mark_reversed(entry_id, at).await
    }

    async fn all_entries(&self) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        (**self).all_entries().await
    }

    async fn account_balance(&self, account: &Account, unit: Currency) -> Result<Decimal, LedgerStoreError> {
        (**self).account_balance(account, unit).await
    }
}

/// Reverse a posted entry: write the opposite-sided correction, then stamp
/// the original. Returns the correction.
pub async fn correct_entry<S>(
    store: &S,
    entry_id: EntryId,
    at: DateTime<Utc>,
) -> Result<LedgerEntry, LedgerStoreError>
where
    S: LedgerStore + ?Sized,
{
    let original = store
        .get(entry_id)
        .await?
        .ok_or(LedgerStoreError::NotFound(entry_id))?;
    if original.is_reversed() {
        return Err(LedgerStoreError::AlreadyReversed(entry_id));
    }
    let correction = original.reversal(at)?;
    store.insert(&correction).await?;
    store.mark_reversed(entry_id, at).await?;
    info!(
        entry_id = %entry_id,
        group_id = %original.group_id,
        ledger_type = %original.ledger_type,
        correction_id = %correction.entry_id,
        "ledger entry reversed"
    );
    Ok(correction)
}
