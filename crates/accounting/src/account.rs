//! Chart of accounts: typed value objects embedded in every ledger entry.

use core::fmt;

use serde::{Deserialize, Serialize};

use keepsats_core::{CustomerId, ValueObject};

/// High-level account type (determines the normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Expense,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Expense => "expense",
        }
    }

    /// Assets and expenses grow on the debit side.
    pub fn is_debit_normal(self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

/// Names of the accounts the bridge posts to.
pub mod names {
    pub const CUSTOMER_LIABILITY: &str = "Customer Liability";
    pub const KEEPSATS_HOLD: &str = "Keepsats Hold";
    pub const CUSTOMER_DEPOSITS_HIVE: &str = "Customer Deposits Hive";
    pub const TREASURY_LIGHTNING: &str = "Treasury Lightning";
    pub const CONVERTED_KEEPSATS_OFFSET: &str = "Converted Keepsats Offset";
    pub const FEE_INCOME_KEEPSATS: &str = "Fee Income Keepsats";
    pub const FEE_INCOME_LIGHTNING: &str = "Fee Income Lightning";
    pub const LIGHTNING_NETWORK_FEES: &str = "Lightning Network Fees";
}

/// One side of a ledger entry.
///
/// `sub` names the sub-ledger: a customer id or an internal pool such as the
/// server account or the Lightning node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub account_type: AccountType,
    pub name: String,
    pub sub: String,
    #[serde(default)]
    pub contra: bool,
}

impl ValueObject for Account {}

/// Identity used when listing accounts: contra is a property of the account,
/// not part of its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub account_type: AccountType,
    pub name: String,
    pub sub: String,
}

impl Account {
    pub fn new(account_type: AccountType, name: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            account_type,
            name: name.into(),
            sub: sub.into(),
            contra: false,
        }
    }

    pub fn asset(name: impl Into<String>, sub: impl Into<String>) -> Self {
        Self::new(AccountType::Asset, name, sub)
    }

    pub fn liability(name: impl Into<String>, sub: impl Into<String>) -> Self {
        Self::new(AccountType::Liability, name, sub)
    }

    pub fn expense(name: impl Into<String>, sub: impl Into<String>) -> Self {
        Self::new(AccountType::Expense, name, sub)
    }

    pub fn contra(mut self) -> Self {
        self.contra = true;
        self
    }

    pub fn key(&self) -> AccountKey {
        AccountKey {
            account_type: self.account_type,
            name: self.name.clone(),
            sub: self.sub.clone(),
        }
    }

    /// Whether a debit increases this account's balance.
    pub fn is_debit_normal(&self) -> bool {
        self.account_type.is_debit_normal() != self.contra
    }

    pub fn customer_liability(cust_id: &CustomerId) -> Self {
        Self::liability(names::CUSTOMER_LIABILITY, cust_id.as_str())
    }

    pub fn keepsats_hold(cust_id: &CustomerId) -> Self {
        Self::liability(names::KEEPSATS_HOLD, cust_id.as_str())
    }

    pub fn customer_deposits_hive(server: &CustomerId) -> Self {
        Self::asset(names::CUSTOMER_DEPOSITS_HIVE, server.as_str())
    }

    pub fn treasury_lightning(node: &CustomerId) -> Self {
        Self::asset(names::TREASURY_LIGHTNING, node.as_str())
    }

    pub fn converted_keepsats_offset(server: &CustomerId) -> Self {
        Self::asset(names::CONVERTED_KEEPSATS_OFFSET, server.as_str()).contra()
    }

    pub fn fee_income_keepsats(server: &CustomerId) -> Self {
        Self::expense(names::FEE_INCOME_KEEPSATS, server.as_str()).contra()
    }

    pub fn fee_income_lightning(node: &CustomerId) -> Self {
        Self::expense(names::FEE_INCOME_LIGHTNING, node.as_str()).contra()
    }

    pub fn lightning_network_fees(node: &CustomerId) -> Self {
        Self::expense(names::LIGHTNING_NETWORK_FEES, node.as_str())
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_name_slash_sub() {
        let alice = CustomerId::parse("alice").unwrap();
        assert_eq!(Account::customer_liability(&alice).to_string(), "Customer Liability/alice");
    }

    #[test]
    fn contra_flips_normal_side() {
        let server = CustomerId::parse("server").unwrap();
        assert!(Account::customer_deposits_hive(&server).is_debit_normal());
        assert!(!Account::converted_keepsats_offset(&server).is_debit_normal());
        assert!(!Account::fee_income_keepsats(&server).is_debit_normal());
        assert!(!Account::customer_liability(&server).is_debit_normal());
    }

    #[test]
    fn key_ignores_contra() {
        let a = Account::asset("X", "y");
        let b = Account::asset("X", "y").contra();
        assert_ne!(a, b);
        assert_eq!(a.key(), b.key());
    }
}
