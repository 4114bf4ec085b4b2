//! Hold/release entry construction.
//!
//! A hold moves value from the customer's liability into their hold
//! sub-ledger while a cross-system leg is in flight. The release mirrors the
//! hold exactly (same unit, amount and frozen conversion) with the sides
//! swapped. Settlement, when the leg succeeds, is a separate entry.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use keepsats_core::{CustomerId, DomainError, DomainResult, EntryId};

use crate::account::Account;
use crate::conversion::ConversionSnapshot;
use crate::currency::Currency;
use crate::ledger::{EntryDraft, GroupId, LedgerEntry, OpRef};
use crate::ledger_type::LedgerType;

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub cust_id: CustomerId,
    /// Root shared by the hold and its release, usually the triggering
    /// event id.
    pub group_root: String,
    pub timestamp: DateTime<Utc>,
    pub op: OpRef,
    pub description: String,
    pub unit: Currency,
    pub amount: Decimal,
    pub conv: ConversionSnapshot,
}

pub fn hold_group(root: &str) -> GroupId {
    GroupId::for_phase(root, LedgerType::HoldKeepsats)
}

pub fn release_group(root: &str) -> GroupId {
    GroupId::for_phase(root, LedgerType::ReleaseKeepsats)
}

/// Recover the shared root from a phase group id.
pub fn group_root(group_id: &GroupId, ledger_type: LedgerType) -> Option<&str> {
    group_id
        .as_str()
        .strip_suffix(ledger_type.as_str())
        .and_then(|rest| rest.strip_suffix('-'))
}

pub fn hold_entry(req: HoldRequest) -> DomainResult<LedgerEntry> {
    LedgerEntry::new(EntryDraft {
        ledger_type: LedgerType::HoldKeepsats,
        group_id: hold_group(&req.group_root),
        debit: Account::customer_liability(&req.cust_id),
        credit: Account::keepsats_hold(&req.cust_id),
        cust_id: req.cust_id,
        timestamp: req.timestamp,
        op: req.op,
        description: req.description,
        unit: req.unit,
        amount: req.amount,
        conv: req.conv,
    })
}

/// Release entry for `hold`: sides reversed, monetary fields copied verbatim.
pub fn release_entry(hold: &LedgerEntry, at: DateTime<Utc>, op: OpRef) -> DomainResult<LedgerEntry> {
    if hold.ledger_type != LedgerType::HoldKeepsats {
        return Err(DomainError::validation(format!(
            "cannot release a {} entry",
            hold.ledger_type
        )));
    }
    let root = group_root(&hold.group_id, LedgerType::HoldKeepsats).ok_or_else(|| {
        DomainError::invariant(format!("hold group id {} has no root", hold.group_id))
    })?;

    let release = LedgerEntry {
        entry_id: EntryId::new(),
        cust_id: hold.cust_id.clone(),
        ledger_type: LedgerType::ReleaseKeepsats,
        group_id: release_group(root),
        timestamp: at,
        op,
        description: format!("Release of {}", hold.group_id),
        debit: hold.credit.clone(),
        debit_unit: hold.credit_unit,
        debit_amount: hold.credit_amount,
        debit_conv: hold.credit_conv.clone(),
        credit: hold.debit.clone(),
        credit_unit: hold.debit_unit,
        credit_amount: hold.debit_amount,
        credit_conv: hold.debit_conv.clone(),
        reversed: None,
    };
    release.validate()?;
    Ok(release)
}
