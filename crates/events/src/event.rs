use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::{CustomJson, Transfer};
use crate::lightning::{Forward, Invoice, Payment};

/// Every kind of external occurrence that may produce ledger entries.
///
/// Tracked events are facts: they are delivered at least once and may be
/// replayed, so everything downstream keys off [`TrackedEvent::event_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackedEvent {
    Transfer(Transfer),
    RecurrentTransfer(Transfer),
    CustomJson(CustomJson),
    Invoice(Invoice),
    Payment(Payment),
    Forward(Forward),
}

impl TrackedEvent {
    /// Stable identity of the event, shared by every delivery of it.
    pub fn event_id(&self) -> String {
        match self {
            TrackedEvent::Transfer(t) | TrackedEvent::RecurrentTransfer(t) => t.event_id(),
            TrackedEvent::CustomJson(c) => c.event_id(),
            TrackedEvent::Invoice(i) => i.event_id(),
            TrackedEvent::Payment(p) => p.event_id(),
            TrackedEvent::Forward(f) => f.event_id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TrackedEvent::Transfer(_) => "transfer",
            TrackedEvent::RecurrentTransfer(_) => "recurrent_transfer",
            TrackedEvent::CustomJson(_) => "custom_json",
            TrackedEvent::Invoice(_) => "invoice",
            TrackedEvent::Payment(_) => "payment",
            TrackedEvent::Forward(_) => "forward",
        }
    }

    /// When the event happened at its source.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TrackedEvent::Transfer(t) | TrackedEvent::RecurrentTransfer(t) => t.timestamp,
            TrackedEvent::CustomJson(c) => c.timestamp,
            TrackedEvent::Invoice(i) => i.occurred_at(),
            TrackedEvent::Payment(p) => p.created_at,
            TrackedEvent::Forward(f) => f.timestamp,
        }
    }
}

impl From<CustomJson> for TrackedEvent {
    fn from(c: CustomJson) -> Self {
        TrackedEvent::CustomJson(c)
    }
}

impl From<Invoice> for TrackedEvent {
    fn from(i: Invoice) -> Self {
        TrackedEvent::Invoice(i)
    }
}

impl From<Payment> for TrackedEvent {
    fn from(p: Payment) -> Self {
        TrackedEvent::Payment(p)
    }
}

impl From<Forward> for TrackedEvent {
    fn from(f: Forward) -> Self {
        TrackedEvent::Forward(f)
    }
}

impl fmt::Display for TrackedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.event_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lightning::PaymentStatus;
    use keepsats_accounting::Currency;
    use keepsats_core::CustomerId;
    use rust_decimal_macros::dec;

    #[test]
    fn recurrent_transfer_shares_transfer_identity() {
        let t = Transfer {
            trx_id: "t1".to_string(),
            op_in_trx: 0,
            block_num: 1,
            timestamp: Utc::now(),
            from: CustomerId::parse("alice").unwrap(),
            to: CustomerId::parse("server").unwrap(),
            amount: dec!(10),
            unit: Currency::Hive,
            memo: String::new(),
        };
        let a = TrackedEvent::Transfer(t.clone());
        let b = TrackedEvent::RecurrentTransfer(t);
        assert_eq!(a.event_id(), b.event_id());
        assert_ne!(a.kind(), b.kind());
    }

    #[test]
    fn serialises_with_kind_tag() {
        let ev = TrackedEvent::Payment(Payment {
            payment_hash: "ph".to_string(),
            status: PaymentStatus::Failed,
            value_msat: dec!(1000),
            fee_msat: dec!(0),
            origin_id: None,
            cust_id: None,
            created_at: Utc::now(),
            failure_reason: Some("no route".to_string()),
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "payment");
        let back: TrackedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
        assert_eq!(ev.to_string(), "payment ph_failed");
    }
}
