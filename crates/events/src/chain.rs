//! Operations read from the Hive chain.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use keepsats_accounting::Currency;
use keepsats_core::CustomerId;

/// Memo tag asking for a Hive deposit to be converted into keepsats.
pub const KEEPSATS_MEMO_TAG: &str = "#sats";

/// `custom_json` id of an internal keepsats transfer.
pub const KEEPSATS_TRANSFER_ID: &str = "keepsats_transfer";

/// `custom_json` id of a Lightning withdrawal request.
pub const LIGHTNING_WITHDRAW_ID: &str = "keepsats_withdraw_lightning";

/// A `transfer` or `recurrent_transfer` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub trx_id: String,
    pub op_in_trx: u32,
    pub block_num: u64,
    pub timestamp: DateTime<Utc>,
    pub from: CustomerId,
    pub to: CustomerId,
    pub amount: Decimal,
    pub unit: Currency,
    #[serde(default)]
    pub memo: String,
}

impl Transfer {
    pub fn event_id(&self) -> String {
        format!("{}_{}", self.trx_id, self.op_in_trx)
    }

    pub fn wants_keepsats(&self) -> bool {
        self.memo.contains(KEEPSATS_MEMO_TAG)
    }
}

/// Move keepsats between two customers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepsatsTransfer {
    pub from: CustomerId,
    pub to: CustomerId,
    pub msats: Decimal,
    #[serde(default)]
    pub memo: String,
}

/// Pay a Lightning invoice out of the sender's keepsats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightningWithdraw {
    pub from: CustomerId,
    pub invoice: String,
    pub msats: Decimal,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomJsonPayload {
    KeepsatsTransfer(KeepsatsTransfer),
    LightningWithdraw(LightningWithdraw),
    /// Any other id, or a known id whose body did not parse.
    Unknown { id: String },
}

impl CustomJsonPayload {
    pub fn parse(id: &str, json: &serde_json::Value) -> Self {
        let parsed = match id {
            KEEPSATS_TRANSFER_ID => serde_json::from_value(json.clone()).map(Self::KeepsatsTransfer).ok(),
            LIGHTNING_WITHDRAW_ID => serde_json::from_value(json.clone()).map(Self::LightningWithdraw).ok(),
            _ => None,
        };
        parsed.unwrap_or_else(|| Self::Unknown { id: id.to_string() })
    }

    /// Customer whose funds the payload moves.
    pub fn sender(&self) -> Option<&CustomerId> {
        match self {
            Self::KeepsatsTransfer(t) => Some(&t.from),
            Self::LightningWithdraw(w) => Some(&w.from),
            Self::Unknown { .. } => None,
        }
    }
}

/// A `custom_json` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomJson {
    pub trx_id: String,
    pub op_in_trx: u32,
    pub block_num: u64,
    pub timestamp: DateTime<Utc>,
    pub id: String,
    pub required_auths: Vec<CustomerId>,
    pub payload: CustomJsonPayload,
}

impl CustomJson {
    pub fn event_id(&self) -> String {
        format!("{}_{}", self.trx_id, self.op_in_trx)
    }

    /// The payload sender, provided they signed the operation.
    pub fn authorised_sender(&self) -> Option<&CustomerId> {
        self.payload
            .sender()
            .filter(|sender| self.required_auths.contains(sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn cust(name: &str) -> CustomerId {
        CustomerId::parse(name).unwrap()
    }

    #[test]
    fn parses_known_payloads() {
        let p = CustomJsonPayload::parse(
            KEEPSATS_TRANSFER_ID,
            &json!({"from": "alice", "to": "bob", "msats": 2500, "memo": "thanks"}),
        );
        match p {
            CustomJsonPayload::KeepsatsTransfer(t) => {
                assert_eq!(t.to, cust("bob"));
                assert_eq!(t.msats, dec!(2500));
            }
            other => panic!("unexpected {other:?}"),
        }

        let p = CustomJsonPayload::parse(
            LIGHTNING_WITHDRAW_ID,
            &json!({"from": "alice", "invoice": "lnbc1...", "msats": "1000"}),
        );
        assert!(matches!(p, CustomJsonPayload::LightningWithdraw(_)));
    }

    #[test]
    fn malformed_or_foreign_payload_is_unknown() {
        let p = CustomJsonPayload::parse(KEEPSATS_TRANSFER_ID, &json!({"from": "Not Valid"}));
        assert_eq!(p, CustomJsonPayload::Unknown { id: KEEPSATS_TRANSFER_ID.to_string() });
        let p = CustomJsonPayload::parse("podping", &json!({}));
        assert_eq!(p.sender(), None);
    }

    #[test]
    fn sender_must_sign() {
        let mut op = CustomJson {
            trx_id: "abc".to_string(),
            op_in_trx: 1,
            block_num: 10,
            timestamp: Utc::now(),
            id: KEEPSATS_TRANSFER_ID.to_string(),
            required_auths: vec![cust("mallory")],
            payload: CustomJsonPayload::KeepsatsTransfer(KeepsatsTransfer {
                from: cust("alice"),
                to: cust("mallory"),
                msats: dec!(1),
                memo: String::new(),
            }),
        };
        assert_eq!(op.authorised_sender(), None);
        op.required_auths.push(cust("alice"));
        assert_eq!(op.authorised_sender(), Some(&cust("alice")));
        assert_eq!(op.event_id(), "abc_1");
    }
}
