//! Process settings.
//!
//! Loaded from an optional TOML file, then overridden by `KEEPSATS__*`
//! environment variables (`KEEPSATS__LOCK__TIMEOUT_SECS=30`). Every field has
//! a default, so an empty environment yields a runnable in-memory setup.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use keepsats_core::CustomerId;

const ENV_PREFIX: &str = "KEEPSATS";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Hive account that receives customer deposits.
    pub server_account: String,
    /// Sub-ledger name of the Lightning node.
    pub node_name: String,
    /// Postgres URL; in-memory stores are used when absent.
    pub database_url: Option<String>,
    /// Redis URL; the in-process lock service is used when absent.
    pub redis_url: Option<String>,
    pub http_addr: String,
    pub lock: LockSettings,
    pub dispatcher: DispatcherSettings,
    pub sanity: SanitySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub key_prefix: String,
    /// Lease length. A holder that outlives it loses the lock.
    pub timeout_secs: u64,
    /// How long `locked` keeps retrying before giving up.
    pub blocking_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub workers: usize,
    pub channel_capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Parts per million of the converted amount kept as conversion fee.
    pub conversion_fee_ppm: u64,
    pub conversion_fee_base_msats: u64,
    /// How far back a quote may be and still price an event.
    pub quote_window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitySettings {
    pub check_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub interval_secs: u64,
    pub balance_tolerance_msats: u64,
    pub hive_tolerance: Decimal,
    /// A hold open longer than this without a release is reported.
    pub stale_hold_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_account: "keepsats".to_string(),
            node_name: "lnd".to_string(),
            database_url: None,
            redis_url: None,
            http_addr: "0.0.0.0:8080".to_string(),
            lock: LockSettings::default(),
            dispatcher: DispatcherSettings::default(),
            sanity: SanitySettings::default(),
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            key_prefix: "keepsats:lock:".to_string(),
            timeout_secs: 60,
            blocking_timeout_secs: 10,
            poll_interval_ms: 50,
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            channel_capacity: 1024,
            max_attempts: 5,
            retry_backoff_ms: 500,
            conversion_fee_ppm: 5_000,
            conversion_fee_base_msats: 0,
            quote_window_secs: 600,
        }
    }
}

impl Default for SanitySettings {
    fn default() -> Self {
        Self {
            check_timeout_secs: 30,
            batch_timeout_secs: 60,
            fetch_timeout_secs: 20,
            interval_secs: 300,
            balance_tolerance_msats: 1_000,
            hive_tolerance: Decimal::new(1, 3),
            stale_hold_secs: 3_600,
        }
    }
}

impl Settings {
    /// Load from `path` (if given and present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string, ignoring the environment.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn server_id(&self) -> Result<CustomerId, ConfigError> {
        parse_id("server_account", &self.server_account)
    }

    pub fn node_id(&self) -> Result<CustomerId, ConfigError> {
        parse_id("node_name", &self.node_name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_id()?;
        self.node_id()?;
        if self.server_account == self.node_name {
            return Err(ConfigError::Invalid {
                key: "node_name",
                reason: "must differ from server_account".to_string(),
            });
        }
        if self.lock.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "lock.timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.lock.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "lock.poll_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.dispatcher.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "dispatcher.workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.dispatcher.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "dispatcher.max_attempts",
                reason: "must be positive".to_string(),
            });
        }
        if self.dispatcher.conversion_fee_ppm >= 1_000_000 {
            return Err(ConfigError::Invalid {
                key: "dispatcher.conversion_fee_ppm",
                reason: "must be below 1_000_000".to_string(),
            });
        }
        if self.sanity.check_timeout_secs == 0 || self.sanity.batch_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "sanity",
                reason: "timeouts must be positive".to_string(),
            });
        }
        if self.sanity.hive_tolerance.is_sign_negative() {
            return Err(ConfigError::Invalid {
                key: "sanity.hive_tolerance",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_id(key: &'static str, raw: &str) -> Result<CustomerId, ConfigError> {
    CustomerId::parse(raw).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

impl LockSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_secs(self.blocking_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl DispatcherSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn quote_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.quote_window_secs).unwrap_or(i64::MAX))
    }
}

impl SanitySettings {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_hold_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_hold_secs).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.lock.key_prefix, "keepsats:lock:");
        assert_eq!(s.lock.timeout(), Duration::from_secs(60));
        assert_eq!(s.sanity.hive_tolerance, Decimal::new(1, 3));
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let s = Settings::from_toml(
            r#"
            server_account = "v4vapp"
            [lock]
            timeout_secs = 5
            [sanity]
            hive_tolerance = "0.01"
            "#,
        )
        .unwrap();
        assert_eq!(s.server_id().unwrap().as_str(), "v4vapp");
        assert_eq!(s.lock.timeout_secs, 5);
        assert_eq!(s.lock.blocking_timeout_secs, 10);
        assert_eq!(s.sanity.hive_tolerance, Decimal::new(1, 2));
        assert_eq!(s.dispatcher.workers, 4);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            Settings::from_toml("server_account = \"Bad Name\""),
            Err(ConfigError::Invalid { key: "server_account", .. })
        ));
        assert!(matches!(
            Settings::from_toml("[dispatcher]\nworkers = 0"),
            Err(ConfigError::Invalid { key: "dispatcher.workers", .. })
        ));
        assert!(Settings::from_toml("server_account = \"lnd\"").is_err());
    }
}
