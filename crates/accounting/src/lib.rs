//! Keepsats ledger domain (double-entry, multi-currency).
//!
//! Pure domain logic only: no IO, no async, no persistence concerns.

pub mod account;
pub mod conversion;
pub mod currency;
pub mod error;
pub mod hold;
pub mod ledger;
pub mod ledger_type;
pub mod quote;
pub mod summary;

pub use account::{Account, AccountKey, AccountType};
pub use conversion::ConversionSnapshot;
pub use currency::{Currency, MSATS_PER_SAT, SATS_PER_BTC};
pub use error::{AccountingError, AccountingResult};
pub use hold::{HoldRequest, hold_entry, hold_group, release_entry, release_group};
pub use ledger::{EntryDraft, GroupId, LedgerEntry, OpRef};
pub use ledger_type::{LedgerType, LedgerTypeDetails, ledger_type_details_for_value, list_all};
pub use quote::{Quote, QuoteResponse, nearest_quote};
pub use summary::{
    DebitCreditTotals, HeldBalance, PairingViolation, account_balance, all_accounts,
    double_entry_totals, held_balances, hold_release_violations,
};
