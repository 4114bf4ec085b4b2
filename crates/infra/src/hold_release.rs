//! Store-backed hold/release orchestration.
//!
//! The entry builders live in `keepsats_accounting::hold`; this module looks
//! the hold up by group id and decides whether a release is due.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use keepsats_accounting::{
    HoldRequest, LedgerEntry, LedgerType, OpRef, hold_entry, hold_group, release_entry, release_group,
};

use crate::ledger_store::{LedgerStore, LedgerStoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// A new release entry. From [`HoldRelease::plan_release`] it is not yet
    /// persisted.
    Released(LedgerEntry),
    /// The hold was already released; carries the existing release.
    AlreadyReleased(LedgerEntry),
    /// No hold exists for the group root. Nothing is written.
    MissingHold,
}

impl ReleaseOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReleaseOutcome::Released(_) => "released",
            ReleaseOutcome::AlreadyReleased(_) => "already_released",
            ReleaseOutcome::MissingHold => "missing_hold",
        }
    }
}

#[derive(Clone)]
pub struct HoldRelease {
    store: Arc<dyn LedgerStore>,
}

impl HoldRelease {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Build and append a hold.
    pub async fn hold(&self, req: HoldRequest) -> Result<LedgerEntry, LedgerStoreError> {
        let entry = hold_entry(req)?;
        self.store.insert(&entry).await?;
        debug!(group_id = %entry.group_id, cust_id = %entry.cust_id, "hold written");
        Ok(entry)
    }

    pub async fn find_hold(&self, root: &str) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        self.store
            .find_one(&hold_group(root), LedgerType::HoldKeepsats)
            .await
    }

    /// Work out the release for `root` without writing it, so the caller can
    /// persist it together with its settlement entries.
    pub async fn plan_release(
        &self,
        root: &str,
        at: DateTime<Utc>,
        op: OpRef,
    ) -> Result<ReleaseOutcome, LedgerStoreError> {
        let Some(hold) = self.find_hold(root).await? else {
            warn!(group_root = root, "release requested but no hold exists");
            return Ok(ReleaseOutcome::MissingHold);
        };
        if let Some(existing) = self
            .store
            .find_one(&release_group(root), LedgerType::ReleaseKeepsats)
            .await?
        {
            return Ok(ReleaseOutcome::AlreadyReleased(existing));
        }
        Ok(ReleaseOutcome::Released(release_entry(&hold, at, op)?))
    }

    /// Release the hold for `root` and persist the release.
    pub async fn release(
        &self,
        root: &str,
        at: DateTime<Utc>,
        op: OpRef,
    ) -> Result<ReleaseOutcome, LedgerStoreError> {
        let outcome = self.plan_release(root, at, op).await?;
        let ReleaseOutcome::Released(entry) = outcome else {
            return Ok(outcome);
        };
        match self.store.insert(&entry).await {
            Ok(()) => Ok(ReleaseOutcome::Released(entry)),
            Err(LedgerStoreError::Duplicate { group_id, ledger_type }) => {
                // Lost a race with another writer; report theirs.
                match self.store.find_one(&group_id, ledger_type).await? {
                    Some(existing) => Ok(ReleaseOutcome::AlreadyReleased(existing)),
                    None => Err(LedgerStoreError::Duplicate { group_id, ledger_type }),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_store::InMemoryLedgerStore;
    use crate::test_support::{cust, test_quote};
    use keepsats_accounting::{ConversionSnapshot, Currency, held_balances};
    use rust_decimal_macros::dec;

    fn request(name: &str, root: &str) -> HoldRequest {
        let amount = dec!(1000);
        HoldRequest {
            cust_id: cust(name),
            group_root: root.to_string(),
            timestamp: Utc::now(),
            op: OpRef::new(root, "custom_json"),
            description: "withdraw".to_string(),
            unit: Currency::Msats,
            amount,
            conv: ConversionSnapshot::compute(Currency::Msats, amount, &test_quote()).unwrap(),
        }
    }

    #[tokio::test]
    async fn alice_hold_and_release_net_to_zero() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let holds = HoldRelease::new(store.clone());
        let hold = holds.hold(request("alice", "tx1")).await.unwrap();
        assert_eq!(hold.group_id.as_str(), "tx1-HOLD_KEEPSATS");

        let outcome = holds
            .release("tx1", Utc::now(), OpRef::new("pay1", "payment"))
            .await
            .unwrap();
        let ReleaseOutcome::Released(release) = outcome else {
            panic!("expected a release, got {outcome:?}");
        };
        assert_eq!(release.credit.to_string(), "Customer Liability/alice");
        assert_eq!(release.credit_amount, dec!(1000));
        assert_eq!(release.credit_unit, Currency::Msats);
        assert_eq!(release.debit_conv, hold.debit_conv);

        let entries = store.all_entries().await.unwrap();
        let held = held_balances(&entries);
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].cust_id.as_str(), "alice");
        assert_eq!(held[0].net_held, dec!(0));
    }

    #[tokio::test]
    async fn second_release_returns_the_first() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let holds = HoldRelease::new(store.clone());
        holds.hold(request("alice", "tx1")).await.unwrap();
        let first = holds
            .release("tx1", Utc::now(), OpRef::new("pay1", "payment"))
            .await
            .unwrap();
        let second = holds
            .release("tx1", Utc::now(), OpRef::new("pay1", "payment"))
            .await
            .unwrap();
        match (first, second) {
            (ReleaseOutcome::Released(a), ReleaseOutcome::AlreadyReleased(b)) => {
                assert_eq!(a.entry_id, b.entry_id)
            }
            other => panic!("unexpected outcomes {other:?}"),
        }
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn missing_hold_writes_nothing() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let holds = HoldRelease::new(store.clone());
        let outcome = holds
            .release("nope", Utc::now(), OpRef::new("pay1", "payment"))
            .await
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::MissingHold);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn plan_release_does_not_persist() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let holds = HoldRelease::new(store.clone());
        holds.hold(request("bob", "tx2")).await.unwrap();
        let outcome = holds
            .plan_release("tx2", Utc::now(), OpRef::new("pay2", "payment"))
            .await
            .unwrap();
        assert_eq!(outcome.label(), "released");
        assert_eq!(store.len(), 1);
    }
}
