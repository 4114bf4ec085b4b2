//! Strongly-typed identifiers used across the ledger.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a persisted ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(EntryId, "EntryId");

/// Base URL used when rendering a customer as a link.
pub const ACCOUNT_EXPLORER_URL: &str = "https://hivehub.dev/@";

const MAX_CUSTOMER_ID_LEN: usize = 128;

/// Identity of a ledger customer.
///
/// Usually a Hive account name; internal pools (the server account, the
/// Lightning node) use the same type. The wrapped string is validated once on
/// construction: non-empty, at most 128 bytes, lower-case ASCII letters,
/// digits, `.`, `-` and `_` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CustomerId(String);

impl CustomerId {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::invalid_id("CustomerId: empty"));
        }
        if value.len() > MAX_CUSTOMER_ID_LEN {
            return Err(DomainError::invalid_id(format!(
                "CustomerId: longer than {MAX_CUSTOMER_ID_LEN} bytes"
            )));
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_')))
        {
            return Err(DomainError::invalid_id(format!(
                "CustomerId: invalid character {bad:?} in {value:?}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Explorer link for a customer account.
pub fn link(id: &CustomerId) -> String {
    format!("{ACCOUNT_EXPLORER_URL}{}", id.as_str())
}

/// Markdown anchor pointing at [`link`].
pub fn markdown(id: &CustomerId) -> String {
    format!("[{}]({})", id.as_str(), link(id))
}

impl core::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CustomerId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CustomerId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CustomerId> for String {
    fn from(value: CustomerId) -> Self {
        value.0
    }
}

impl AsRef<str> for CustomerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_id_accepts_hive_style_names() {
        for name in ["alice", "v4vapp.dev", "node-1", "keepsats_pool", "a1"] {
            assert!(CustomerId::parse(name).is_ok(), "{name} should parse");
        }
    }

    #[test]
    fn customer_id_rejects_malformed_input() {
        assert!(CustomerId::parse("").is_err());
        assert!(CustomerId::parse("Alice").is_err());
        assert!(CustomerId::parse("bob smith").is_err());
        assert!(CustomerId::parse("x".repeat(129)).is_err());
    }

    #[test]
    fn derived_views_are_pure_functions() {
        let id = CustomerId::parse("alice").unwrap();
        assert_eq!(link(&id), "https://hivehub.dev/@alice");
        assert_eq!(markdown(&id), "[alice](https://hivehub.dev/@alice)");
    }

    #[test]
    fn customer_id_deserialization_validates() {
        let ok: CustomerId = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<CustomerId>("\"Not Valid\"").is_err());
    }

    #[test]
    fn entry_id_round_trips_through_display() {
        let id = EntryId::new();
        let parsed: EntryId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
