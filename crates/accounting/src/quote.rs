//! Price quotes and quote selection for back-dated conversions.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use keepsats_core::DomainError;

use crate::currency::{Currency, SATS_PER_BTC};
use crate::error::{AccountingError, AccountingResult};

/// A price quote: direct rates between every priced currency.
///
/// `rates[from][to]` is the number of `to` units one `from` unit buys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub fetched_at: DateTime<Utc>,
    pub source: String,
    rates: BTreeMap<Currency, BTreeMap<Currency, Decimal>>,
}

impl Quote {
    /// Quote with an explicit rate matrix.
    pub fn with_rates(
        fetched_at: DateTime<Utc>,
        source: impl Into<String>,
        rates: BTreeMap<Currency, BTreeMap<Currency, Decimal>>,
    ) -> Self {
        Self {
            fetched_at,
            source: source.into(),
            rates,
        }
    }

    /// Build the full matrix from USD spot prices, the form most price feeds
    /// publish.
    pub fn from_usd_prices(
        fetched_at: DateTime<Utc>,
        source: impl Into<String>,
        hive_usd: Decimal,
        hbd_usd: Decimal,
        btc_usd: Decimal,
    ) -> AccountingResult<Self> {
        if hive_usd <= Decimal::ZERO || hbd_usd <= Decimal::ZERO || btc_usd <= Decimal::ZERO {
            return Err(DomainError::validation("usd prices must be positive").into());
        }

        let usd_per_unit = |c: Currency| -> Decimal {
            match c {
                Currency::Hive => hive_usd,
                Currency::Hbd => hbd_usd,
                Currency::Usd => Decimal::ONE,
                // Only called for priced currencies.
                _ => btc_usd / SATS_PER_BTC,
            }
        };

        let mut rates = BTreeMap::new();
        for from in Currency::PRICED {
            let mut row = BTreeMap::new();
            for to in Currency::PRICED {
                let rate = if from == to {
                    Decimal::ONE
                } else {
                    usd_per_unit(from)
                        .checked_div(usd_per_unit(to))
                        .ok_or_else(|| DomainError::validation("rate overflow"))?
                };
                row.insert(to, rate);
            }
            rates.insert(from, row);
        }

        Ok(Self::with_rates(fetched_at, source, rates))
    }

    /// Direct rate `from -> to`. No routing through a third currency.
    pub fn rate(&self, from: Currency, to: Currency) -> AccountingResult<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        self.rates
            .get(&from)
            .and_then(|row| row.get(&to))
            .copied()
            .ok_or(AccountingError::MissingRate { from, to })
    }
}

/// Response of a quote source: the blended quote plus each feed's own quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub global: Quote,
    pub sources: Vec<Quote>,
}

/// Pick the quote to price a conversion at `at`.
///
/// Prefers the most recent quote fetched at or before `at` and no older than
/// `window`. Otherwise returns the nearest quote overall; on an exact tie the
/// quote before `at` wins.
pub fn nearest_quote(quotes: &[Quote], at: DateTime<Utc>, window: Duration) -> Option<&Quote> {
    let in_window = quotes
        .iter()
        .filter(|q| q.fetched_at <= at && at - q.fetched_at <= window)
        .max_by_key(|q| q.fetched_at);
    if in_window.is_some() {
        return in_window;
    }

    quotes.iter().min_by(|a, b| {
        let da = distance(at, a.fetched_at);
        let db = distance(at, b.fetched_at);
        // Equal distance: the earlier fetch (the one before `at`) sorts first.
        da.cmp(&db).then(a.fetched_at.cmp(&b.fetched_at))
    })
}

fn distance(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    if a >= b { a - b } else { b - a }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn quote_at(secs: i64) -> Quote {
        Quote::from_usd_prices(t(secs), format!("q{secs}"), dec!(0.25), dec!(1), dec!(100000)).unwrap()
    }

    #[test]
    fn usd_prices_fill_direct_rates() {
        let q = quote_at(0);
        assert_eq!(q.rate(Currency::Hive, Currency::Usd).unwrap(), dec!(0.25));
        // 1 sat = 0.001 USD at 100k USD/BTC
        assert_eq!(q.rate(Currency::Usd, Currency::Sats).unwrap(), dec!(1000));
        assert_eq!(q.rate(Currency::Hive, Currency::Sats).unwrap(), dec!(250));
        assert_eq!(q.rate(Currency::Hbd, Currency::Hbd).unwrap(), Decimal::ONE);
    }

    #[test]
    fn missing_pair_is_reported() {
        let q = Quote::with_rates(t(0), "empty", BTreeMap::new());
        assert_eq!(
            q.rate(Currency::Hive, Currency::Sats).unwrap_err(),
            AccountingError::MissingRate {
                from: Currency::Hive,
                to: Currency::Sats
            }
        );
    }

    #[test]
    fn non_positive_price_rejected() {
        assert!(Quote::from_usd_prices(t(0), "bad", dec!(0), dec!(1), dec!(1)).is_err());
    }

    #[test]
    fn prefers_latest_quote_inside_window() {
        let quotes = vec![quote_at(-100), quote_at(-10), quote_at(5)];
        let q = nearest_quote(&quotes, t(0), Duration::seconds(60)).unwrap();
        assert_eq!(q.source, "q-10");
    }

    #[test]
    fn falls_back_to_nearest_overall() {
        let quotes = vec![quote_at(-500), quote_at(30)];
        let q = nearest_quote(&quotes, t(0), Duration::seconds(60)).unwrap();
        assert_eq!(q.source, "q30");
    }

    #[test]
    fn exact_tie_prefers_quote_before() {
        let quotes = vec![quote_at(100), quote_at(-100)];
        let q = nearest_quote(&quotes, t(0), Duration::seconds(60)).unwrap();
        assert_eq!(q.source, "q-100");
    }

    #[test]
    fn empty_history_has_no_quote() {
        assert!(nearest_quote(&[], t(0), Duration::seconds(60)).is_none());
    }
}
