//! Reconciliation checks comparing ledger-derived balances against the
//! ledger's own laws and against outside truth (chain and node balances).
//!
//! A failed check is a [`CheckOutcome`], not an error; [`SanityError`] is
//! for checks that could not reach a verdict.

mod checks;
mod engine;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use keepsats_accounting::{HeldBalance, LedgerEntry};
use keepsats_core::CustomerId;

use crate::config::SanitySettings;
use crate::external::ExternalError;
use crate::ledger_store::LedgerStoreError;

pub use checks::{
    BalanceSheetCheck, HeldBalancesCheck, HoldReleasePairingCheck, NodeBalanceCheck, ServerHiveBalanceCheck,
};
pub use engine::SanityCheckEngine;

#[derive(Debug, thiserror::Error)]
pub enum SanityError {
    #[error("{what} timed out after {after_ms}ms")]
    ExternalFetchTimeout { what: &'static str, after_ms: u64 },

    #[error("{what} failed: {source}")]
    External {
        what: &'static str,
        #[source]
        source: ExternalError,
    },

    #[error(transparent)]
    Store(#[from] LedgerStoreError),
}

/// Verdict of a check that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub details: String,
}

impl CheckOutcome {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    /// The check returned an error or panicked.
    Errored,
    TimedOut,
    /// Still running when the batch deadline fired.
    Unfinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: String,
    pub elapsed_ms: u64,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SanityCheckResults {
    pub results: Vec<CheckResult>,
    pub failed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SanityCheckResults {
    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed())
    }
}

/// Ledger snapshot shared by every check of one run.
#[derive(Debug, Clone)]
pub struct SanityContext {
    pub entries: Vec<LedgerEntry>,
    /// Hold/release totals per customer, computed once per run.
    pub held: Vec<HeldBalance>,
    pub server: CustomerId,
    pub node: CustomerId,
    pub settings: SanitySettings,
    pub taken_at: DateTime<Utc>,
}

#[async_trait]
pub trait SanityCheck: Send + Sync {
    fn name(&self) -> &'static str;

    /// Overrides the engine's per-check timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn run(&self, ctx: &SanityContext) -> Result<CheckOutcome, SanityError>;
}

/// Bound one external call by `limit`, independent of the calling check's
/// own timeout.
pub async fn fetch_with_timeout<T, F>(what: &'static str, limit: Duration, fetch: F) -> Result<T, SanityError>
where
    F: Future<Output = Result<T, ExternalError>>,
{
    match tokio::time::timeout(limit, fetch).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(SanityError::External { what, source }),
        Err(_) => Err(SanityError::ExternalFetchTimeout {
            what,
            after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
