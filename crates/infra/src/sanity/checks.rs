use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use keepsats_accounting::hold::group_root;
use keepsats_accounting::{
    Account, Currency, LedgerType, PairingViolation, account_balance, double_entry_totals, hold_release_violations,
};

use super::{CheckOutcome, SanityCheck, SanityContext, SanityError, fetch_with_timeout};
use crate::external::{ChainBalanceSource, LightningNode};

/// Debits equal credits in every currency across the whole ledger.
#[derive(Debug, Default, Clone, Copy)]
pub struct BalanceSheetCheck;

#[async_trait]
impl SanityCheck for BalanceSheetCheck {
    fn name(&self) -> &'static str {
        "balance_sheet"
    }

    async fn run(&self, ctx: &SanityContext) -> Result<CheckOutcome, SanityError> {
        let totals = double_entry_totals(&ctx.entries);
        let unbalanced: Vec<String> = totals
            .iter()
            .filter(|(_, t)| !t.is_balanced())
            .map(|(unit, t)| format!("{unit}: debits {} != credits {}", t.debits, t.credits))
            .collect();
        if unbalanced.is_empty() {
            Ok(CheckOutcome::pass(format!(
                "{} entries balanced in {} currencies",
                ctx.entries.len(),
                totals.len()
            )))
        } else {
            Ok(CheckOutcome::fail(unbalanced.join("; ")))
        }
    }
}

/// Ledger view of the server's on-chain holdings against the chain itself.
pub struct ServerHiveBalanceCheck {
    chain: Arc<dyn ChainBalanceSource>,
}

impl ServerHiveBalanceCheck {
    pub fn new(chain: Arc<dyn ChainBalanceSource>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl SanityCheck for ServerHiveBalanceCheck {
    fn name(&self) -> &'static str {
        "server_hive_balance"
    }

    async fn run(&self, ctx: &SanityContext) -> Result<CheckOutcome, SanityError> {
        let actual = fetch_with_timeout(
            "chain balance fetch",
            ctx.settings.fetch_timeout(),
            self.chain.account_balances(&ctx.server),
        )
        .await?;

        let key = Account::customer_deposits_hive(&ctx.server).key();
        let mut mismatches = Vec::new();
        let mut report = Vec::new();
        for unit in [Currency::Hive, Currency::Hbd] {
            let ledger = account_balance(&ctx.entries, &key, unit);
            let chain = actual.get(unit).unwrap_or_default();
            let drift = (ledger - chain).abs();
            report.push(format!("{unit} ledger {ledger} chain {chain}"));
            if drift > ctx.settings.hive_tolerance {
                mismatches.push(format!("{unit} off by {drift}"));
            }
        }
        if mismatches.is_empty() {
            Ok(CheckOutcome::pass(report.join(", ")))
        } else {
            Ok(CheckOutcome::fail(format!(
                "{} ({})",
                mismatches.join(", "),
                report.join(", ")
            )))
        }
    }
}

/// Ledger view of the node's channel liquidity against the node wallet.
pub struct NodeBalanceCheck {
    node: Arc<dyn LightningNode>,
}

impl NodeBalanceCheck {
    pub fn new(node: Arc<dyn LightningNode>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl SanityCheck for NodeBalanceCheck {
    fn name(&self) -> &'static str {
        "node_balance"
    }

    async fn run(&self, ctx: &SanityContext) -> Result<CheckOutcome, SanityError> {
        let wallet = fetch_with_timeout(
            "node wallet fetch",
            ctx.settings.fetch_timeout(),
            self.node.wallet_balance(),
        )
        .await?;

        let key = Account::treasury_lightning(&ctx.node).key();
        let ledger = account_balance(&ctx.entries, &key, Currency::Msats);
        let drift = (ledger - wallet.channel_local_msats).abs();
        let tolerance = Decimal::from(ctx.settings.balance_tolerance_msats);
        let details = format!(
            "ledger {ledger} msats, node {} msats, drift {drift}",
            wallet.channel_local_msats
        );
        if drift > tolerance {
            Ok(CheckOutcome::fail(details))
        } else {
            Ok(CheckOutcome::pass(details))
        }
    }
}

/// Nobody has released more than they held, and no hold has been open for
/// longer than `stale_hold_secs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeldBalancesCheck;

#[async_trait]
impl SanityCheck for HeldBalancesCheck {
    fn name(&self) -> &'static str {
        "held_balances"
    }

    async fn run(&self, ctx: &SanityContext) -> Result<CheckOutcome, SanityError> {
        let mut problems: Vec<String> = ctx
            .held
            .iter()
            .filter(|h| h.net_held.is_sign_negative() && !h.net_held.is_zero())
            .map(|h| format!("{} released {} more {} than held", h.cust_id, -h.net_held, h.unit))
            .collect();

        let released: HashSet<&str> = ctx
            .entries
            .iter()
            .filter(|e| e.ledger_type == LedgerType::ReleaseKeepsats)
            .filter_map(|e| group_root(&e.group_id, LedgerType::ReleaseKeepsats))
            .collect();
        let cutoff = ctx.taken_at - ctx.settings.stale_hold_after();
        let stale: Vec<String> = ctx
            .entries
            .iter()
            .filter(|e| e.ledger_type == LedgerType::HoldKeepsats && !e.is_reversed())
            .filter(|e| e.timestamp < cutoff)
            .filter_map(|e| group_root(&e.group_id, LedgerType::HoldKeepsats).map(|root| (root, e)))
            .filter(|(root, _)| !released.contains(root))
            .map(|(root, e)| format!("hold {root} for {} open since {}", e.cust_id, e.timestamp))
            .collect();
        problems.extend(stale);

        let open = ctx.held.iter().filter(|h| h.net_held > Decimal::ZERO).count();
        if problems.is_empty() {
            Ok(CheckOutcome::pass(format!(
                "{} customers with holds, {open} in flight",
                ctx.held.len()
            )))
        } else {
            Ok(CheckOutcome::fail(problems.join("; ")))
        }
    }
}

/// Every release mirrors exactly one hold.
#[derive(Debug, Default, Clone, Copy)]
pub struct HoldReleasePairingCheck;

#[async_trait]
impl SanityCheck for HoldReleasePairingCheck {
    fn name(&self) -> &'static str {
        "hold_release_pairing"
    }

    async fn run(&self, ctx: &SanityContext) -> Result<CheckOutcome, SanityError> {
        let violations = hold_release_violations(&ctx.entries);
        if violations.is_empty() {
            return Ok(CheckOutcome::pass("all releases mirror their hold"));
        }
        let details = violations
            .iter()
            .map(|v| match v {
                PairingViolation::ReleaseWithoutHold { group_root } => format!("{group_root}: release without hold"),
                PairingViolation::DuplicateRelease { group_root, count } => {
                    format!("{group_root}: released {count} times")
                }
                PairingViolation::MismatchedRelease { group_root } => {
                    format!("{group_root}: release differs from hold")
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        Ok(CheckOutcome::fail(details))
    }
}
