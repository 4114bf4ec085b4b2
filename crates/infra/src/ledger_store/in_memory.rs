use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keepsats_accounting::{Account, Currency, GroupId, LedgerEntry, LedgerType, account_balance};
use rust_decimal::Decimal;
use keepsats_core::EntryId;

use super::query::LedgerQuery;
use super::{LedgerStore, LedgerStoreError};

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<LedgerEntry>,
    by_group: HashMap<(GroupId, LedgerType), usize>,
    by_id: HashMap<EntryId, usize>,
}

impl Inner {
    fn check_insertable(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
        entry.validate()?;
        if self
            .by_group
            .contains_key(&(entry.group_id.clone(), entry.ledger_type))
        {
            return Err(LedgerStoreError::Duplicate {
                group_id: entry.group_id.clone(),
                ledger_type: entry.ledger_type,
            });
        }
        Ok(())
    }

    fn push(&mut self, entry: LedgerEntry) {
        let idx = self.entries.len();
        self.by_group
            .insert((entry.group_id.clone(), entry.ledger_type), idx);
        self.by_id.insert(entry.entry_id, idx);
        self.entries.push(entry);
    }
}

/// In-memory ledger for tests and single-process dev runs.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, LedgerStoreError> {
        self.inner
            .read()
            .map_err(|_| LedgerStoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, LedgerStoreError> {
        self.inner
            .write()
            .map_err(|_| LedgerStoreError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
        let mut inner = self.write()?;
        inner.check_insertable(entry)?;
        inner.push(entry.clone());
        Ok(())
    }

    async fn insert_batch(&self, entries: &[LedgerEntry]) -> Result<(), LedgerStoreError> {
        let mut inner = self.write()?;
        for (idx, entry) in entries.iter().enumerate() {
            inner.check_insertable(entry)?;
            let repeated = entries[..idx]
                .iter()
                .any(|e| e.group_id == entry.group_id && e.ledger_type == entry.ledger_type);
            if repeated {
                return Err(LedgerStoreError::Duplicate {
                    group_id: entry.group_id.clone(),
                    ledger_type: entry.ledger_type,
                });
            }
        }
        for entry in entries {
            inner.push(entry.clone());
        }
        Ok(())
    }

    async fn upsert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
        entry.validate()?;
        let mut inner = self.write()?;
        let key = (entry.group_id.clone(), entry.ledger_type);
        match inner.by_group.get(&key).copied() {
            Some(idx) => {
                let old_id = inner.entries[idx].entry_id;
                inner.by_id.remove(&old_id);
                inner.by_id.insert(entry.entry_id, idx);
                inner.entries[idx] = entry.clone();
            }
            None => inner.push(entry.clone()),
        }
        Ok(())
    }

    async fn get(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        let inner = self.read()?;
        Ok(inner.by_id.get(&entry_id).map(|&idx| inner.entries[idx].clone()))
    }

    async fn find_one(
        &self,
        group_id: &GroupId,
        ledger_type: LedgerType,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        let inner = self.read()?;
        Ok(inner
            .by_group
            .get(&(group_id.clone(), ledger_type))
            .map(|&idx| inner.entries[idx].clone()))
    }

    async fn find_by_group(&self, group_id: &GroupId) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let inner = self.read()?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| &e.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn group_exists(&self, group_id: &GroupId) -> Result<bool, LedgerStoreError> {
        let inner = self.read()?;
        Ok(inner.entries.iter().any(|e| &e.group_id == group_id))
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let inner = self.read()?;
        let mut out: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.timestamp);
        if !query.oldest_first {
            out.reverse();
        }
        out.truncate(query.effective_limit());
        Ok(out)
    }

    async fn mark_reversed(&self, entry_id: EntryId, at: DateTime<Utc>) -> Result<(), LedgerStoreError> {
        let mut inner = self.write()?;
        let idx = *inner
            .by_id
            .get(&entry_id)
            .ok_or(LedgerStoreError::NotFound(entry_id))?;
        inner.entries[idx].reversed = Some(at);
        Ok(())
    }

    async fn all_entries(&self) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let inner = self.read()?;
        let mut out = inner.entries.clone();
        out.sort_by_key(|e| e.timestamp);
        Ok(out)
    }

    async fn account_balance(&self, account: &Account, unit: Currency) -> Result<Decimal, LedgerStoreError> {
        let inner = self.read()?;
        Ok(account_balance(&inner.entries, &account.key(), unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_store::correct_entry;
    use crate::ledger_store::query::MAX_LIMIT;
    use crate::test_support::{cust, deposit, keepsats_deposit};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn duplicate_group_and_type_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let e = deposit("alice", "t1", dec!(10));
        store.insert(&e).await.unwrap();
        let again = deposit("alice", "t1", dec!(10));
        assert!(matches!(
            store.insert(&again).await,
            Err(LedgerStoreError::Duplicate { .. })
        ));
        assert_eq!(store.len(), 1);
        assert!(store.group_exists(&e.group_id).await.unwrap());
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = InMemoryLedgerStore::new();
        store.insert(&deposit("alice", "t2", dec!(1))).await.unwrap();
        let batch = vec![deposit("alice", "t1", dec!(1)), deposit("alice", "t2", dec!(2))];
        assert!(store.insert_batch(&batch).await.is_err());
        assert_eq!(store.len(), 1);

        let batch = vec![deposit("alice", "t3", dec!(1)), deposit("bob", "t4", dec!(2))];
        store.insert_batch(&batch).await.unwrap();
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let store = InMemoryLedgerStore::new();
        for (i, who) in ["alice", "bob", "alice"].iter().enumerate() {
            store
                .insert(&deposit(who, &format!("t{i}"), dec!(1)))
                .await
                .unwrap();
        }
        let alice = store
            .query(&LedgerQuery::new().customer(cust("alice")))
            .await
            .unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice[0].timestamp >= alice[1].timestamp);

        let limited = store.query(&LedgerQuery::new().limit(1).oldest_first()).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].group_id.as_str(), "t0-DEPOSIT_HIVE");
    }

    #[tokio::test]
    async fn correction_reverses_once() {
        let store = InMemoryLedgerStore::new();
        let e = deposit("alice", "t1", dec!(10));
        store.insert(&e).await.unwrap();

        let correction = correct_entry(&store, e.entry_id, Utc::now()).await.unwrap();
        assert_eq!(correction.debit, e.credit);
        assert!(store.get(e.entry_id).await.unwrap().unwrap().is_reversed());
        assert!(matches!(
            correct_entry(&store, e.entry_id, Utc::now()).await,
            Err(LedgerStoreError::AlreadyReversed(_))
        ));
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let store = InMemoryLedgerStore::new();
        let e = deposit("alice", "t1", dec!(10));
        store.insert(&e).await.unwrap();
        let replacement = deposit("alice", "t1", dec!(12));
        store.upsert(&replacement).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(e.entry_id).await.unwrap().is_none());
        let found = store
            .find_one(&e.group_id, LedgerType::DepositHive)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.debit_amount, dec!(12));
    }

    #[tokio::test]
    async fn account_balance_covers_the_whole_history() {
        let store = InMemoryLedgerStore::new();
        let old = Utc::now() - chrono::Duration::days(30);
        store
            .insert(&keepsats_deposit("alice", "inv0", dec!(1_000_000), old))
            .await
            .unwrap();
        let batch: Vec<_> = (1..=MAX_LIMIT)
            .map(|i| keepsats_deposit("alice", &format!("inv{i}"), dec!(1), Utc::now()))
            .collect();
        store.insert_batch(&batch).await.unwrap();

        let page = store.query(&LedgerQuery::default()).await.unwrap();
        assert_eq!(page.len(), MAX_LIMIT);
        let balance = store
            .account_balance(&Account::customer_liability(&cust("alice")), Currency::Msats)
            .await
            .unwrap();
        assert_eq!(balance, dec!(1_000_000) + Decimal::from(MAX_LIMIT));
    }
}
