//! Catalogue of transaction kinds and their display metadata.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use keepsats_core::DomainError;

/// Enumerates every kind of ledger entry the bridge writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerType {
    DepositHive,
    WithdrawHive,
    ExchangeConversion,
    ConversionFee,
    CustomJsonTransfer,
    HoldKeepsats,
    ReleaseKeepsats,
    DepositKeepsats,
    WithdrawLightning,
    LightningFee,
    ForwardFee,
    Correction,
}

impl LedgerType {
    pub const ALL: [LedgerType; 12] = [
        LedgerType::DepositHive,
        LedgerType::WithdrawHive,
        LedgerType::ExchangeConversion,
        LedgerType::ConversionFee,
        LedgerType::CustomJsonTransfer,
        LedgerType::HoldKeepsats,
        LedgerType::ReleaseKeepsats,
        LedgerType::DepositKeepsats,
        LedgerType::WithdrawLightning,
        LedgerType::LightningFee,
        LedgerType::ForwardFee,
        LedgerType::Correction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LedgerType::DepositHive => "DEPOSIT_HIVE",
            LedgerType::WithdrawHive => "WITHDRAW_HIVE",
            LedgerType::ExchangeConversion => "EXCHANGE_CONVERSION",
            LedgerType::ConversionFee => "CONVERSION_FEE",
            LedgerType::CustomJsonTransfer => "CUSTOM_JSON_TRANSFER",
            LedgerType::HoldKeepsats => "HOLD_KEEPSATS",
            LedgerType::ReleaseKeepsats => "RELEASE_KEEPSATS",
            LedgerType::DepositKeepsats => "DEPOSIT_KEEPSATS",
            LedgerType::WithdrawLightning => "WITHDRAW_LIGHTNING",
            LedgerType::LightningFee => "LIGHTNING_FEE",
            LedgerType::ForwardFee => "FORWARD_FEE",
            LedgerType::Correction => "CORRECTION",
        }
    }

    /// Human label, where one is configured.
    fn label(self) -> Option<&'static str> {
        match self {
            LedgerType::DepositHive => Some("Hive deposit"),
            LedgerType::WithdrawHive => Some("Hive withdrawal"),
            LedgerType::ExchangeConversion => Some("Conversion"),
            LedgerType::ConversionFee => Some("Conversion fee"),
            LedgerType::CustomJsonTransfer => Some("Keepsats transfer"),
            LedgerType::HoldKeepsats => Some("Hold keepsats"),
            LedgerType::ReleaseKeepsats => Some("Release keepsats"),
            LedgerType::DepositKeepsats => Some("Lightning deposit"),
            LedgerType::WithdrawLightning => Some("Lightning withdrawal"),
            LedgerType::LightningFee => Some("Lightning routing fee"),
            LedgerType::ForwardFee | LedgerType::Correction => None,
        }
    }

    /// Icon, where one is configured.
    fn icon(self) -> Option<&'static str> {
        match self {
            LedgerType::DepositHive | LedgerType::DepositKeepsats => Some("📥"),
            LedgerType::WithdrawHive | LedgerType::WithdrawLightning => Some("📤"),
            LedgerType::ExchangeConversion => Some("🔄"),
            LedgerType::HoldKeepsats => Some("⏸️"),
            LedgerType::ReleaseKeepsats => Some("▶️"),
            LedgerType::LightningFee | LedgerType::ForwardFee => Some("⚡"),
            LedgerType::CustomJsonTransfer => Some("🔁"),
            LedgerType::ConversionFee | LedgerType::Correction => None,
        }
    }

    pub fn details(self) -> LedgerTypeDetails {
        LedgerTypeDetails {
            ledger_type: self,
            value: self.as_str(),
            label: self.label().unwrap_or(self.as_str()).to_string(),
            icon: self.icon().unwrap_or_default().to_string(),
        }
    }
}

/// Display metadata for a ledger type, with fallbacks applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerTypeDetails {
    pub ledger_type: LedgerType,
    pub value: &'static str,
    pub label: String,
    pub icon: String,
}

/// Look up a ledger type by its stored value. Unknown values give `None`.
pub fn ledger_type_details_for_value(value: &str) -> Option<LedgerTypeDetails> {
    value.parse::<LedgerType>().ok().map(LedgerType::details)
}

/// One details record per ledger type, in declaration order.
pub fn list_all() -> Vec<LedgerTypeDetails> {
    LedgerType::ALL.iter().map(|t| t.details()).collect()
}

impl fmt::Display for LedgerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LedgerType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown ledger type: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn list_all_is_a_bijection() {
        let all = list_all();
        assert_eq!(all.len(), LedgerType::ALL.len());
        let keys: HashSet<_> = all.iter().map(|d| d.ledger_type).collect();
        assert_eq!(keys.len(), all.len());
        for t in LedgerType::ALL {
            assert!(keys.contains(&t));
        }
    }

    #[test]
    fn missing_label_falls_back_to_value() {
        let d = ledger_type_details_for_value("FORWARD_FEE").unwrap();
        assert_eq!(d.label, "FORWARD_FEE");
        assert_eq!(d.label, LedgerType::ForwardFee.as_str());
        assert_eq!(d.icon, "⚡");
    }

    #[test]
    fn missing_icon_falls_back_to_empty() {
        let d = ledger_type_details_for_value("CONVERSION_FEE").unwrap();
        assert_eq!(d.icon, "");
        assert_eq!(d.label, "Conversion fee");
    }

    #[test]
    fn unknown_value_is_absent() {
        assert!(ledger_type_details_for_value("NOT_A_TYPE").is_none());
        assert!(ledger_type_details_for_value("").is_none());
    }

    #[test]
    fn serde_value_matches_as_str() {
        for t in LedgerType::ALL {
            assert_eq!(serde_json::to_string(&t).unwrap(), format!("\"{}\"", t.as_str()));
        }
    }
}
