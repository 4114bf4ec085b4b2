use core::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use keepsats_core::{CustomerId, DomainError, DomainResult, EntryId};

use crate::account::Account;
use crate::conversion::ConversionSnapshot;
use crate::currency::Currency;
use crate::ledger_type::LedgerType;

/// Correlation and idempotency key of one logical transaction phase.
///
/// Derived from the triggering event id, e.g. `tx1-HOLD_KEEPSATS`. At most one
/// entry exists per `(group_id, ledger_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// `{root}-{LEDGER_TYPE}`
    pub fn for_phase(root: &str, ledger_type: LedgerType) -> Self {
        Self(format!("{root}-{}", ledger_type.as_str()))
    }

    /// `{root}-{LEDGER_TYPE}-{leg}` for phases that write several entries of
    /// the same type.
    pub fn for_leg(root: &str, ledger_type: LedgerType, leg: &str) -> Self {
        Self(format!("{root}-{}-{leg}", ledger_type.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the external event that caused an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpRef {
    pub event_id: String,
    pub kind: String,
}

impl OpRef {
    pub fn new(event_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            kind: kind.into(),
        }
    }
}

/// The append-only double-entry record.
///
/// Never mutated after it is written, apart from the `reversed` stamp set when
/// a correcting entry is posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub cust_id: CustomerId,
    pub ledger_type: LedgerType,
    pub group_id: GroupId,
    pub timestamp: DateTime<Utc>,
    pub op: OpRef,
    pub description: String,

    pub debit: Account,
    pub debit_unit: Currency,
    pub debit_amount: Decimal,
    pub debit_conv: ConversionSnapshot,

    pub credit: Account,
    pub credit_unit: Currency,
    pub credit_amount: Decimal,
    pub credit_conv: ConversionSnapshot,

    #[serde(default)]
    pub reversed: Option<DateTime<Utc>>,
}

/// Inputs for a new entry. Both sides share one unit, amount and snapshot, so
/// every entry is balanced by construction.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub cust_id: CustomerId,
    pub ledger_type: LedgerType,
    pub group_id: GroupId,
    pub timestamp: DateTime<Utc>,
    pub op: OpRef,
    pub description: String,
    pub debit: Account,
    pub credit: Account,
    pub unit: Currency,
    pub amount: Decimal,
    pub conv: ConversionSnapshot,
}

impl LedgerEntry {
    pub fn new(draft: EntryDraft) -> DomainResult<Self> {
        let entry = Self {
            entry_id: EntryId::new(),
            cust_id: draft.cust_id,
            ledger_type: draft.ledger_type,
            group_id: draft.group_id,
            timestamp: draft.timestamp,
            op: draft.op,
            description: draft.description,
            debit: draft.debit,
            debit_unit: draft.unit,
            debit_amount: draft.amount,
            debit_conv: draft.conv.clone(),
            credit: draft.credit,
            credit_unit: draft.unit,
            credit_amount: draft.amount,
            credit_conv: draft.conv,
            reversed: None,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Check the per-entry invariants. Entries loaded from storage go through
    /// this too.
    pub fn validate(&self) -> DomainResult<()> {
        if self.debit_amount <= Decimal::ZERO {
            return Err(DomainError::validation("amount must be positive"));
        }
        if self.debit_unit != self.credit_unit {
            return Err(DomainError::invariant(format!(
                "debit unit {} differs from credit unit {}",
                self.debit_unit, self.credit_unit
            )));
        }
        if self.debit_amount != self.credit_amount {
            return Err(DomainError::invariant("debits must equal credits"));
        }
        if self.debit == self.credit {
            return Err(DomainError::validation(format!(
                "debit and credit are the same account ({})",
                self.debit
            )));
        }
        Ok(())
    }

    pub fn unit(&self) -> Currency {
        self.debit_unit
    }

    pub fn amount(&self) -> Decimal {
        self.debit_amount
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed.is_some()
    }

    /// Opposite-sided correcting entry. The caller persists it and stamps
    /// `reversed` on the original.
    pub fn reversal(&self, at: DateTime<Utc>) -> DomainResult<LedgerEntry> {
        if self.ledger_type == LedgerType::Correction {
            return Err(DomainError::validation("a correction cannot be reversed"));
        }
        LedgerEntry::new(EntryDraft {
            cust_id: self.cust_id.clone(),
            ledger_type: LedgerType::Correction,
            group_id: GroupId::for_phase(self.group_id.as_str(), LedgerType::Correction),
            timestamp: at,
            op: self.op.clone(),
            description: format!("Reversal of {} {}", self.ledger_type, self.entry_id),
            debit: self.credit.clone(),
            credit: self.debit.clone(),
            unit: self.debit_unit,
            amount: self.debit_amount,
            conv: self.debit_conv.clone(),
        })
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} debit {} credit {}",
            self.ledger_type, self.group_id, self.debit_amount, self.debit_unit, self.debit, self.credit
        )
    }
}
