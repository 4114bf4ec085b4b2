use core::fmt;
use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::AccountingError;

/// Satoshis in one bitcoin.
pub const SATS_PER_BTC: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

/// Millisatoshis in one satoshi.
pub const MSATS_PER_SAT: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);

/// The closed set of units the bridge ledgers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    /// The on-chain asset.
    Hive,
    /// The on-chain stable asset.
    Hbd,
    Usd,
    Sats,
    Msats,
    Btc,
}

impl Currency {
    pub const ALL: [Currency; 6] = [
        Currency::Hive,
        Currency::Hbd,
        Currency::Usd,
        Currency::Sats,
        Currency::Msats,
        Currency::Btc,
    ];

    /// Currencies that carry a market rate in a quote. MSATS and BTC are
    /// fixed multiples of SATS.
    pub const PRICED: [Currency; 4] = [Currency::Hive, Currency::Hbd, Currency::Usd, Currency::Sats];

    pub fn as_str(self) -> &'static str {
        match self {
            Currency::Hive => "hive",
            Currency::Hbd => "hbd",
            Currency::Usd => "usd",
            Currency::Sats => "sats",
            Currency::Msats => "msats",
            Currency::Btc => "btc",
        }
    }

    /// Whether the currency lives on the Hive chain.
    pub fn is_on_chain(self) -> bool {
        matches!(self, Currency::Hive | Currency::Hbd)
    }

    /// Apply the currency's display/storage rounding convention.
    ///
    /// HIVE and HBD keep 3 places and USD 6, both rounding half up. SATS and
    /// MSATS are integers (truncated), BTC keeps 8 places.
    pub fn round(self, amount: Decimal) -> Decimal {
        match self {
            Currency::Hive | Currency::Hbd => {
                amount.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
            }
            Currency::Usd => amount.round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero),
            Currency::Sats | Currency::Msats => amount.trunc(),
            Currency::Btc => amount.round_dp_with_strategy(8, RoundingStrategy::ToZero),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = AccountingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hive" => Ok(Currency::Hive),
            "hbd" => Ok(Currency::Hbd),
            "usd" => Ok(Currency::Usd),
            "sats" | "sat" => Ok(Currency::Sats),
            "msats" | "msat" => Ok(Currency::Msats),
            "btc" => Ok(Currency::Btc),
            other => Err(AccountingError::UnsupportedCurrency(other.to_string())),
        }
    }
}
