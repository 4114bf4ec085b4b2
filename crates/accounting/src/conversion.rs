//! Frozen multi-currency valuation attached to every ledger entry side.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use keepsats_core::{DomainError, ValueObject};

use crate::currency::{Currency, MSATS_PER_SAT, SATS_PER_BTC};
use crate::error::AccountingResult;
use crate::quote::Quote;

/// Value of one amount in every supported currency, computed once from a
/// source `(currency, amount)` and a quote.
///
/// There are no mutators: a snapshot attached to a ledger entry is never
/// re-priced, and a release copies the hold's snapshot as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSnapshot {
    source: Currency,
    quote_source: String,
    quoted_at: DateTime<Utc>,
    values: BTreeMap<Currency, Decimal>,
}

impl ValueObject for ConversionSnapshot {}

impl ConversionSnapshot {
    /// Value `amount` of `currency` in every currency using `quote`.
    pub fn compute(currency: Currency, amount: Decimal, quote: &Quote) -> AccountingResult<Self> {
        let (base, base_amount) = match currency {
            Currency::Msats => (Currency::Sats, amount / MSATS_PER_SAT),
            Currency::Btc => (Currency::Sats, checked_mul(amount, SATS_PER_BTC)?),
            other => (other, amount),
        };

        let mut values = BTreeMap::new();
        for target in [Currency::Hive, Currency::Hbd, Currency::Usd] {
            let raw = checked_mul(base_amount, quote.rate(base, target)?)?;
            values.insert(target, target.round(raw));
        }

        let sats = Currency::Sats.round(checked_mul(base_amount, quote.rate(base, Currency::Sats)?)?);
        let msats = if currency == Currency::Msats {
            Currency::Msats.round(amount)
        } else {
            checked_mul(sats, MSATS_PER_SAT)?
        };
        let btc = if currency == Currency::Btc {
            Currency::Btc.round(amount)
        } else {
            sats / SATS_PER_BTC
        };
        values.insert(Currency::Sats, sats);
        values.insert(Currency::Msats, msats);
        values.insert(Currency::Btc, btc);

        Ok(Self {
            source: currency,
            quote_source: quote.source.clone(),
            quoted_at: quote.fetched_at,
            values,
        })
    }

    /// Like [`ConversionSnapshot::compute`] but from a currency code, failing
    /// with `UnsupportedCurrency` for codes outside the ledgered set.
    pub fn compute_from_code(code: &str, amount: Decimal, quote: &Quote) -> AccountingResult<Self> {
        let currency: Currency = code.parse()?;
        Self::compute(currency, amount, quote)
    }

    pub fn source(&self) -> Currency {
        self.source
    }

    pub fn quote_source(&self) -> &str {
        &self.quote_source
    }

    pub fn quoted_at(&self) -> DateTime<Utc> {
        self.quoted_at
    }

    pub fn value(&self, currency: Currency) -> Decimal {
        self.values.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn values(&self) -> &BTreeMap<Currency, Decimal> {
        &self.values
    }
}

fn checked_mul(a: Decimal, b: Decimal) -> AccountingResult<Decimal> {
    a.checked_mul(b)
        .ok_or_else(|| DomainError::validation(format!("conversion overflow: {a} * {b}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccountingError;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn quote() -> Quote {
        // 1 HIVE = 0.25 USD, 1 HBD = 1 USD, 1 BTC = 100k USD  => 1 sat = 0.001 USD
        Quote::from_usd_prices(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            "test",
            dec!(0.25),
            dec!(1),
            dec!(100000),
        )
        .unwrap()
    }

    #[test]
    fn hive_source_values_every_currency() {
        let conv = ConversionSnapshot::compute(Currency::Hive, dec!(10), &quote()).unwrap();
        assert_eq!(conv.value(Currency::Hive), dec!(10));
        assert_eq!(conv.value(Currency::Usd), dec!(2.5));
        assert_eq!(conv.value(Currency::Hbd), dec!(2.5));
        assert_eq!(conv.value(Currency::Sats), dec!(2500));
        assert_eq!(conv.value(Currency::Msats), dec!(2500000));
        assert_eq!(conv.value(Currency::Btc), dec!(0.000025));
        assert_eq!(conv.source(), Currency::Hive);
        assert_eq!(conv.quote_source(), "test");
    }

    #[test]
    fn sats_are_truncated_and_msats_follow() {
        // 0.0015 USD = 1.5 sats -> 1 sat, 1000 msats
        let conv = ConversionSnapshot::compute(Currency::Usd, dec!(0.0015), &quote()).unwrap();
        assert_eq!(conv.value(Currency::Sats), dec!(1));
        assert_eq!(conv.value(Currency::Msats), dec!(1000));
    }

    #[test]
    fn msats_source_keeps_exact_msats() {
        let conv = ConversionSnapshot::compute(Currency::Msats, dec!(1500), &quote()).unwrap();
        assert_eq!(conv.value(Currency::Msats), dec!(1500));
        assert_eq!(conv.value(Currency::Sats), dec!(1));
        assert_eq!(conv.value(Currency::Usd), dec!(0.0015));
    }

    #[test]
    fn hive_rounds_half_up_to_three_places() {
        // 1 sat = 0.004 HIVE
        let conv = ConversionSnapshot::compute(Currency::Msats, dec!(125), &quote()).unwrap();
        // 0.125 sats * 0.004 = 0.0005 HIVE -> 0.001 (half up)
        assert_eq!(conv.value(Currency::Hive), dec!(0.001));
    }

    #[test]
    fn btc_source_normalises_through_sats() {
        let conv = ConversionSnapshot::compute(Currency::Btc, dec!(0.00001), &quote()).unwrap();
        assert_eq!(conv.value(Currency::Sats), dec!(1000));
        assert_eq!(conv.value(Currency::Usd), dec!(1));
        assert_eq!(conv.value(Currency::Btc), dec!(0.00001));
    }

    #[test]
    fn unsupported_code_fails() {
        let err = ConversionSnapshot::compute_from_code("doge", dec!(1), &quote()).unwrap_err();
        assert_eq!(err, AccountingError::UnsupportedCurrency("doge".to_string()));
    }

    #[test]
    fn snapshot_survives_serde_unchanged() {
        let conv = ConversionSnapshot::compute(Currency::Hbd, dec!(3.333), &quote()).unwrap();
        let json = serde_json::to_string(&conv).unwrap();
        let back: ConversionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(conv, back);
    }
}
