use thiserror::Error;

use keepsats_core::DomainError;

use crate::currency::Currency;

/// Result alias for accounting operations.
pub type AccountingResult<T> = Result<T, AccountingError>;

/// Error type surfaced by pure accounting operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountingError {
    /// The currency code is not one of the fixed set the bridge ledgers.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// The quote carries no direct rate for the requested pair.
    #[error("quote has no direct rate {from} -> {to}")]
    MissingRate { from: Currency, to: Currency },

    #[error(transparent)]
    Domain(#[from] DomainError),
}
