//! Read-side filters over the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keepsats_accounting::{GroupId, LedgerEntry, LedgerType};
use keepsats_core::CustomerId;

/// Upper bound on rows returned by one query.
pub const MAX_LIMIT: usize = 10_000;

/// Filter for [`LedgerStore::query`](super::LedgerStore::query). Every set
/// field must match; results are newest first unless `oldest_first` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub cust_id: Option<CustomerId>,
    /// Matches entries where either side's sub-ledger is this name.
    pub account_sub: Option<String>,
    pub group_id: Option<GroupId>,
    pub ledger_type: Option<LedgerType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub oldest_first: bool,
}

impl LedgerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn customer(mut self, cust_id: CustomerId) -> Self {
        self.cust_id = Some(cust_id);
        self
    }

    pub fn account_sub(mut self, sub: impl Into<String>) -> Self {
        self.account_sub = Some(sub.into());
        self
    }

    pub fn group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn ledger_type(mut self, ledger_type: LedgerType) -> Self {
        self.ledger_type = Some(ledger_type);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.oldest_first = true;
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(MAX_LIMIT).min(MAX_LIMIT)
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.cust_id.as_ref().is_none_or(|c| &entry.cust_id == c)
            && self
                .account_sub
                .as_deref()
                .is_none_or(|s| entry.debit.sub == s || entry.credit.sub == s)
            && self.group_id.as_ref().is_none_or(|g| &entry.group_id == g)
            && self.ledger_type.is_none_or(|t| entry.ledger_type == t)
            && self.from.is_none_or(|from| entry.timestamp >= from)
            && self.to.is_none_or(|to| entry.timestamp <= to)
    }
}
