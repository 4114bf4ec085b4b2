//! Aggregations over a set of ledger entries.
//!
//! Stores may push these down into their query engine; the functions here are
//! the reference semantics and the in-memory implementation.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::Serialize;

use keepsats_core::CustomerId;

use crate::account::{Account, AccountKey};
use crate::currency::Currency;
use crate::hold::group_root;
use crate::ledger::LedgerEntry;
use crate::ledger_type::LedgerType;

/// Sum of debit and credit amounts for one currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DebitCreditTotals {
    pub debits: Decimal,
    pub credits: Decimal,
}

impl DebitCreditTotals {
    pub fn is_balanced(&self) -> bool {
        self.debits == self.credits
    }
}

/// Per-currency debit and credit totals across `entries`.
pub fn double_entry_totals<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> BTreeMap<Currency, DebitCreditTotals> {
    let mut totals: BTreeMap<Currency, DebitCreditTotals> = BTreeMap::new();
    for e in entries {
        totals.entry(e.debit_unit).or_default().debits += e.debit_amount;
        totals.entry(e.credit_unit).or_default().credits += e.credit_amount;
    }
    totals
}

/// Every distinct account referenced by `entries`, ordered by key.
pub fn all_accounts<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Vec<Account> {
    let mut seen: BTreeMap<AccountKey, Account> = BTreeMap::new();
    for e in entries {
        for account in [&e.debit, &e.credit] {
            seen.entry(account.key()).or_insert_with(|| account.clone());
        }
    }
    seen.into_values().collect()
}

/// Signed balance of one account in one unit, positive on its normal side.
pub fn account_balance<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    key: &AccountKey,
    unit: Currency,
) -> Decimal {
    let mut balance = Decimal::ZERO;
    for e in entries {
        if e.debit_unit == unit && &e.debit.key() == key {
            balance += if e.debit.is_debit_normal() { e.debit_amount } else { -e.debit_amount };
        }
        if e.credit_unit == unit && &e.credit.key() == key {
            balance += if e.credit.is_debit_normal() { -e.credit_amount } else { e.credit_amount };
        }
    }
    balance
}

/// Outstanding holds for one customer and unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldBalance {
    pub cust_id: CustomerId,
    pub unit: Currency,
    pub hold_total: Decimal,
    pub release_total: Decimal,
    pub net_held: Decimal,
}

/// Hold and release totals per customer. Reversed entries are skipped.
pub fn held_balances<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Vec<HeldBalance> {
    let mut acc: BTreeMap<(CustomerId, Currency), (Decimal, Decimal)> = BTreeMap::new();
    for e in entries {
        if e.is_reversed() {
            continue;
        }
        let slot = match e.ledger_type {
            LedgerType::HoldKeepsats => &mut acc.entry((e.cust_id.clone(), e.debit_unit)).or_default().0,
            LedgerType::ReleaseKeepsats => &mut acc.entry((e.cust_id.clone(), e.debit_unit)).or_default().1,
            _ => continue,
        };
        *slot += e.debit_amount;
    }
    acc.into_iter()
        .map(|((cust_id, unit), (hold_total, release_total))| HeldBalance {
            cust_id,
            unit,
            hold_total,
            release_total,
            net_held: hold_total - release_total,
        })
        .collect()
}

/// Ways a hold and its release can disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PairingViolation {
    ReleaseWithoutHold { group_root: String },
    DuplicateRelease { group_root: String, count: usize },
    MismatchedRelease { group_root: String },
}

/// Check every release against its hold: exactly one release per hold, with
/// identical unit, amount and conversion snapshot.
pub fn hold_release_violations<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> Vec<PairingViolation> {
    let mut holds: HashMap<String, &LedgerEntry> = HashMap::new();
    let mut releases: BTreeMap<String, Vec<&LedgerEntry>> = BTreeMap::new();
    for e in entries {
        match e.ledger_type {
            LedgerType::HoldKeepsats => {
                if let Some(root) = group_root(&e.group_id, LedgerType::HoldKeepsats) {
                    holds.insert(root.to_string(), e);
                }
            }
            LedgerType::ReleaseKeepsats => {
                if let Some(root) = group_root(&e.group_id, LedgerType::ReleaseKeepsats) {
                    releases.entry(root.to_string()).or_default().push(e);
                }
            }
            _ => {}
        }
    }

    let mut violations = Vec::new();
    for (root, rels) in releases {
        let Some(hold) = holds.get(&root) else {
            violations.push(PairingViolation::ReleaseWithoutHold { group_root: root });
            continue;
        };
        if rels.len() > 1 {
            violations.push(PairingViolation::DuplicateRelease {
                group_root: root.clone(),
                count: rels.len(),
            });
        }
        let mirrored = rels.iter().all(|r| {
            r.credit_unit == hold.debit_unit
                && r.credit_amount == hold.debit_amount
                && r.debit_conv == hold.debit_conv
                && r.credit == hold.debit
                && r.debit == hold.credit
        });
        if !mirrored {
            violations.push(PairingViolation::MismatchedRelease { group_root: root });
        }
    }
    violations
}
