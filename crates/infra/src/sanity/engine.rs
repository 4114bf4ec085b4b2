use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use keepsats_accounting::held_balances;
use keepsats_core::CustomerId;

use super::checks::{
    BalanceSheetCheck, HeldBalancesCheck, HoldReleasePairingCheck, NodeBalanceCheck, ServerHiveBalanceCheck,
};
use super::{CheckResult, CheckStatus, SanityCheck, SanityCheckResults, SanityContext, SanityError};
use crate::config::SanitySettings;
use crate::external::{ChainBalanceSource, LightningNode};
use crate::ledger_store::LedgerStore;

/// Runs an ordered set of independent checks concurrently.
///
/// Each check gets its own timeout and the batch an outer one. A check that
/// errors, panics or times out becomes a failed result; it never takes its
/// siblings down and `run_all_checks` never returns an error.
pub struct SanityCheckEngine {
    ledger: Arc<dyn LedgerStore>,
    checks: Vec<Arc<dyn SanityCheck>>,
    server: CustomerId,
    node: CustomerId,
    settings: SanitySettings,
}

impl std::fmt::Debug for SanityCheckEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SanityCheckEngine")
            .field("checks", &self.check_names())
            .field("server", &self.server)
            .field("node", &self.node)
            .finish()
    }
}

impl SanityCheckEngine {
    /// An engine with no checks.
    pub fn new(ledger: Arc<dyn LedgerStore>, server: CustomerId, node: CustomerId, settings: SanitySettings) -> Self {
        Self {
            ledger,
            checks: Vec::new(),
            server,
            node,
            settings,
        }
    }

    /// The standard reconciliation set, in run order.
    pub fn with_default_checks(
        self,
        chain: Arc<dyn ChainBalanceSource>,
        lightning: Arc<dyn LightningNode>,
    ) -> Self {
        self.with_check(BalanceSheetCheck)
            .with_check(ServerHiveBalanceCheck::new(chain))
            .with_check(NodeBalanceCheck::new(lightning))
            .with_check(HeldBalancesCheck)
            .with_check(HoldReleasePairingCheck)
    }

    pub fn with_check(mut self, check: impl SanityCheck + 'static) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn settings(&self) -> &SanitySettings {
        &self.settings
    }

    async fn snapshot(&self) -> Result<SanityContext, SanityError> {
        let entries = self.ledger.all_entries().await?;
        let held = held_balances(&entries);
        Ok(SanityContext {
            entries,
            held,
            server: self.server.clone(),
            node: self.node.clone(),
            settings: self.settings.clone(),
            taken_at: Utc::now(),
        })
    }

    /// Every check reported with the same status, for when none could run.
    fn none_ran(&self, status: CheckStatus, details: &str, elapsed_ms: u64) -> Vec<CheckResult> {
        self.checks
            .iter()
            .map(|c| CheckResult {
                name: c.name().to_string(),
                status,
                details: details.to_string(),
                elapsed_ms,
            })
            .collect()
    }

    #[instrument(skip(self), fields(checks = self.checks.len()))]
    pub async fn run_all_checks(&self) -> SanityCheckResults {
        let started_at = Utc::now();
        let clock = Instant::now();
        // The snapshot counts against the batch deadline too.
        let deadline_at = tokio::time::Instant::now() + self.settings.batch_timeout();

        let ctx = match tokio::time::timeout_at(deadline_at, self.snapshot()).await {
            Ok(Ok(ctx)) => Arc::new(ctx),
            Ok(Err(e)) => {
                error!(error = %e, "sanity snapshot failed; no check can run");
                let details = format!("ledger snapshot failed: {e}");
                return SanityCheckResults {
                    results: self.none_ran(CheckStatus::Errored, &details, elapsed_ms(clock)),
                    failed: true,
                    started_at,
                    finished_at: Utc::now(),
                };
            }
            Err(_) => {
                let batch_ms = elapsed_ms(clock);
                error!(elapsed_ms = batch_ms, "sanity snapshot outlived the batch deadline; no check ran");
                let details = format!("ledger snapshot still loading when the {batch_ms}ms batch deadline fired");
                return SanityCheckResults {
                    results: self.none_ran(CheckStatus::Unfinished, &details, batch_ms),
                    failed: true,
                    started_at,
                    finished_at: Utc::now(),
                };
            }
        };

        let mut slots: Vec<Option<CheckResult>> = vec![None; self.checks.len()];
        let mut running = JoinSet::new();
        for (idx, check) in self.checks.iter().enumerate() {
            let limit = check.timeout().unwrap_or_else(|| self.settings.check_timeout());
            running.spawn(run_one(idx, check.clone(), ctx.clone(), limit));
        }

        let deadline = tokio::time::sleep_until(deadline_at);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Ok((idx, result))) => slots[idx] = Some(result),
                    Some(Err(e)) => error!(error = %e, "sanity check task lost"),
                    None => break,
                },
                _ = &mut deadline => {
                    for (idx, slot) in slots.iter().enumerate() {
                        if slot.is_none() {
                            warn!(
                                check = self.checks[idx].name(),
                                status = "in_flight",
                                "sanity batch deadline reached before check finished"
                            );
                        }
                    }
                    running.abort_all();
                    break;
                }
            }
        }

        let batch_ms = elapsed_ms(clock);
        let results: Vec<CheckResult> = slots
            .into_iter()
            .zip(&self.checks)
            .map(|(slot, check)| {
                slot.unwrap_or_else(|| CheckResult {
                    name: check.name().to_string(),
                    status: CheckStatus::Unfinished,
                    details: format!("still running when the {batch_ms}ms batch deadline fired"),
                    elapsed_ms: batch_ms,
                })
            })
            .collect();

        let failed_count = results.iter().filter(|r| !r.passed()).count();
        if failed_count == 0 {
            info!(total = results.len(), elapsed_ms = batch_ms, "sanity checks passed");
        } else {
            warn!(
                total = results.len(),
                failed = failed_count,
                elapsed_ms = batch_ms,
                "sanity checks reported failures"
            );
        }

        SanityCheckResults {
            failed: failed_count > 0,
            results,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

async fn run_one(
    idx: usize,
    check: Arc<dyn SanityCheck>,
    ctx: Arc<SanityContext>,
    limit: Duration,
) -> (usize, CheckResult) {
    let name = check.name();
    let clock = Instant::now();
    info!(check = name, "sanity check started");

    let guarded = AssertUnwindSafe(check.run(&ctx)).catch_unwind();
    let (status, details) = match tokio::time::timeout(limit, guarded).await {
        Ok(Ok(Ok(outcome))) if outcome.passed => (CheckStatus::Passed, outcome.details),
        Ok(Ok(Ok(outcome))) => (CheckStatus::Failed, outcome.details),
        Ok(Ok(Err(e))) => (CheckStatus::Errored, e.to_string()),
        Ok(Err(_)) => (CheckStatus::Errored, "check panicked".to_string()),
        Err(_) => (
            CheckStatus::TimedOut,
            format!("no verdict within {}ms", limit.as_millis()),
        ),
    };

    let elapsed_ms = elapsed_ms(clock);
    match status {
        CheckStatus::Passed => info!(check = name, elapsed_ms, "sanity check finished"),
        CheckStatus::Failed => warn!(check = name, elapsed_ms, details = %details, "sanity check failed"),
        _ => error!(check = name, elapsed_ms, ?status, details = %details, "sanity check did not complete"),
    }

    (
        idx,
        CheckResult {
            name: name.to_string(),
            status,
            details,
            elapsed_ms,
        },
    )
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_store::{InMemoryLedgerStore, LedgerQuery, LedgerStoreError};
    use crate::sanity::CheckOutcome;
    use crate::test_support::{CapturedLogs, NODE, SERVER, cust, deposit};
    use async_trait::async_trait;
    use chrono::DateTime;
    use keepsats_accounting::{Account, Currency, GroupId, LedgerEntry, LedgerType};
    use keepsats_core::EntryId;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Sleepy(Duration);

    #[async_trait]
    impl SanityCheck for Sleepy {
        fn name(&self) -> &'static str {
            "slow_check"
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(1))
        }

        async fn run(&self, _ctx: &SanityContext) -> Result<CheckOutcome, SanityError> {
            tokio::time::sleep(self.0).await;
            Ok(CheckOutcome::pass("woke up"))
        }
    }

    struct Fast;

    #[async_trait]
    impl SanityCheck for Fast {
        fn name(&self) -> &'static str {
            "fast_check"
        }

        async fn run(&self, ctx: &SanityContext) -> Result<CheckOutcome, SanityError> {
            Ok(CheckOutcome::pass(format!("{} entries", ctx.entries.len())))
        }
    }

    struct Panics;

    #[async_trait]
    impl SanityCheck for Panics {
        fn name(&self) -> &'static str {
            "panicking_check"
        }

        async fn run(&self, _ctx: &SanityContext) -> Result<CheckOutcome, SanityError> {
            panic!("boom")
        }
    }

    fn engine(settings: SanitySettings) -> (Arc<InMemoryLedgerStore>, SanityCheckEngine) {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let engine = SanityCheckEngine::new(ledger.clone(), cust(SERVER), cust(NODE), settings);
        (ledger, engine)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_check_times_out_without_affecting_fast_check() {
        let (logs, _guard) = CapturedLogs::install();
        let (ledger, engine) = engine(SanitySettings::default());
        ledger.insert(&deposit("alice", "t1", dec!(10))).await.unwrap();
        let engine = engine.with_check(Sleepy(Duration::from_secs(10))).with_check(Fast);

        let started = tokio::time::Instant::now();
        let results = engine.run_all_checks().await;
        assert!(started.elapsed() < engine.settings().batch_timeout());

        assert!(results.failed);
        assert_eq!(results.get("slow_check").unwrap().status, CheckStatus::TimedOut);
        let fast = results.get("fast_check").unwrap();
        assert!(fast.passed());
        assert_eq!(fast.details, "1 entries");
        assert_eq!(results.failed_checks().count(), 1);

        for name in ["slow_check", "fast_check"] {
            assert_eq!(logs.matching(&["sanity check started", name]).len(), 1, "{name} start");
        }
        assert_eq!(logs.matching(&["sanity check finished", "fast_check"]).len(), 1);
        assert_eq!(logs.matching(&["sanity check did not complete", "slow_check"]).len(), 1);
    }

    /// In-memory ledger whose full scan takes `delay`.
    struct SlowLedger {
        inner: InMemoryLedgerStore,
        delay: Duration,
    }

    #[async_trait]
    impl LedgerStore for SlowLedger {
        async fn insert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
            self.inner.insert(entry).await
        }

        async fn insert_batch(&self, entries: &[LedgerEntry]) -> Result<(), LedgerStoreError> {
            self.inner.insert_batch(entries).await
        }

        async fn upsert(&self, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
            self.inner.upsert(entry).await
        }

        async fn get(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, LedgerStoreError> {
            self.inner.get(entry_id).await
        }

        async fn find_one(
            &self,
            group_id: &GroupId,
            ledger_type: LedgerType,
        ) -> Result<Option<LedgerEntry>, LedgerStoreError> {
            self.inner.find_one(group_id, ledger_type).await
        }

        async fn find_by_group(&self, group_id: &GroupId) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
            self.inner.find_by_group(group_id).await
        }

        async fn group_exists(&self, group_id: &GroupId) -> Result<bool, LedgerStoreError> {
            self.inner.group_exists(group_id).await
        }

        async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
            self.inner.query(query).await
        }

        async fn mark_reversed(&self, entry_id: EntryId, at: DateTime<Utc>) -> Result<(), LedgerStoreError> {
            self.inner.mark_reversed(entry_id, at).await
        }

        async fn all_entries(&self) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.all_entries().await
        }

        async fn account_balance(&self, account: &Account, unit: Currency) -> Result<Decimal, LedgerStoreError> {
            self.inner.account_balance(account, unit).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_snapshot_is_bounded_by_the_batch_deadline() {
        let settings = SanitySettings {
            batch_timeout_secs: 2,
            ..SanitySettings::default()
        };
        let ledger = Arc::new(SlowLedger {
            inner: InMemoryLedgerStore::new(),
            delay: Duration::from_secs(4),
        });
        let engine = SanityCheckEngine::new(ledger, cust(SERVER), cust(NODE), settings)
            .with_check(Fast)
            .with_check(Sleepy(Duration::ZERO));

        let started = tokio::time::Instant::now();
        let results = engine.run_all_checks().await;
        assert!(started.elapsed() <= Duration::from_secs(2));

        assert!(results.failed);
        assert_eq!(results.results.len(), 2);
        for r in &results.results {
            assert_eq!(r.status, CheckStatus::Unfinished, "{}", r.name);
            assert!(r.details.contains("snapshot"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_deadline_marks_running_checks_unfinished() {
        let settings = SanitySettings {
            batch_timeout_secs: 2,
            check_timeout_secs: 30,
            ..SanitySettings::default()
        };
        let (_ledger, engine) = engine(settings);

        struct Stuck;

        #[async_trait]
        impl SanityCheck for Stuck {
            fn name(&self) -> &'static str {
                "stuck_check"
            }

            async fn run(&self, _ctx: &SanityContext) -> Result<CheckOutcome, SanityError> {
                std::future::pending().await
            }
        }

        let results = engine.with_check(Stuck).with_check(Fast).run_all_checks().await;
        assert_eq!(results.results.len(), 2);
        assert_eq!(results.results[0].status, CheckStatus::Unfinished);
        assert!(results.results[1].passed());
    }

    #[tokio::test]
    async fn panicking_check_is_an_errored_result() {
        let (_ledger, engine) = engine(SanitySettings::default());
        let results = engine.with_check(Panics).with_check(Fast).run_all_checks().await;
        assert_eq!(results.get("panicking_check").unwrap().status, CheckStatus::Errored);
        assert!(results.get("fast_check").unwrap().passed());
    }

    #[tokio::test]
    async fn empty_engine_passes() {
        let (_ledger, engine) = engine(SanitySettings::default());
        let results = engine.run_all_checks().await;
        assert!(!results.failed);
        assert!(results.results.is_empty());
        assert!(results.finished_at >= results.started_at);
    }
}
