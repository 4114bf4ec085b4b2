use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use keepsats_accounting::{AccountingError, HeldBalance, Quote};

/// USD spot prices pushed by the price feed.
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub hive_usd: Decimal,
    pub hbd_usd: Decimal,
    pub btc_usd: Decimal,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl QuoteRequest {
    pub fn into_quote(self) -> Result<Quote, AccountingError> {
        Quote::from_usd_prices(
            self.fetched_at.unwrap_or_else(Utc::now),
            self.source.unwrap_or_else(|| "api".to_string()),
            self.hive_usd,
            self.hbd_usd,
            self.btc_usd,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct EventAccepted {
    pub event_id: String,
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HeldBalanceJson {
    pub cust_id: String,
    pub unit: String,
    pub hold_total: Decimal,
    pub release_total: Decimal,
    pub net_held: Decimal,
}

pub fn held_balance_to_json(h: HeldBalance) -> HeldBalanceJson {
    HeldBalanceJson {
        cust_id: h.cust_id.to_string(),
        unit: h.unit.to_string(),
        hold_total: h.hold_total,
        release_total: h.release_total,
        net_held: h.net_held,
    }
}
