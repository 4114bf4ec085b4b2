//! Events reported by the Lightning node.

use core::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use keepsats_core::CustomerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Open,
    Accepted,
    Settled,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub r_hash: String,
    pub add_index: u64,
    pub state: InvoiceState,
    pub value_msat: Decimal,
    pub amt_paid_msat: Decimal,
    #[serde(default)]
    pub memo: String,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn event_id(&self) -> String {
        self.r_hash.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.state == InvoiceState::Settled
    }

    /// First `@account` mentioned in the memo that is a valid customer id.
    pub fn memo_customer(&self) -> Option<CustomerId> {
        self.memo
            .split_whitespace()
            .filter_map(|word| word.strip_prefix('@'))
            .map(|name| name.trim_end_matches(|c: char| !(c.is_ascii_alphanumeric())))
            .find_map(|name| CustomerId::parse(name).ok())
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.settled_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    InFlight,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::InFlight => "in_flight",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing payment update.
///
/// `origin_id` is the id of the event that placed the hold funding this
/// payment; payments without one were not made on a customer's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_hash: String,
    pub status: PaymentStatus,
    pub value_msat: Decimal,
    pub fee_msat: Decimal,
    pub origin_id: Option<String>,
    pub cust_id: Option<CustomerId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl Payment {
    /// A payment is reported once per status change, so the status is part
    /// of the identity.
    pub fn event_id(&self) -> String {
        format!("{}_{}", self.payment_hash, self.status)
    }
}

/// A settled or failed HTLC forward through the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    pub incoming_channel_id: u64,
    pub incoming_htlc_id: u64,
    pub outgoing_channel_id: u64,
    pub settled: bool,
    pub amt_in_msat: Decimal,
    pub fee_msat: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Forward {
    pub fn event_id(&self) -> String {
        format!("forward_{}_{}", self.incoming_channel_id, self.incoming_htlc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn invoice(memo: &str) -> Invoice {
        Invoice {
            r_hash: "hash1".to_string(),
            add_index: 7,
            state: InvoiceState::Settled,
            value_msat: dec!(5000),
            amt_paid_msat: dec!(5000),
            memo: memo.to_string(),
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[test]
    fn memo_customer_takes_first_valid_mention() {
        assert_eq!(invoice("deposit for @alice").memo_customer().unwrap().as_str(), "alice");
        assert_eq!(invoice("@Bad then @bob.").memo_customer().unwrap().as_str(), "bob");
        assert!(invoice("no mention").memo_customer().is_none());
    }

    #[test]
    fn payment_id_includes_status() {
        let mut p = Payment {
            payment_hash: "ph".to_string(),
            status: PaymentStatus::InFlight,
            value_msat: dec!(1000),
            fee_msat: dec!(0),
            origin_id: Some("tx1".to_string()),
            cust_id: None,
            created_at: Utc::now(),
            failure_reason: None,
        };
        let in_flight = p.event_id();
        p.status = PaymentStatus::Succeeded;
        assert_ne!(in_flight, p.event_id());
        assert_eq!(p.event_id(), "ph_succeeded");
    }
}
