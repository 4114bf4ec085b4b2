//! Tracked event → ledger entries, exactly once.
//!
//! ```text
//! TrackedEvent
//!   ↓
//! 1. Route: resolve the customer and the primary group id (pure, no lock)
//!   ↓
//! 2. Idempotency: tracked-event record or primary group already present → Duplicate
//!   ↓
//! 3. Acquire the customer lock (busy → retryable error)
//!   ↓
//! 4. Re-check idempotency, build the entries for the event kind
//!   ↓
//! 5. Persist entries atomically, then the tracked-event record
//!   ↓
//! 6. Release the lock, emit one summary log line
//! ```
//!
//! Steps 4 and 5 run under the lock's lease: if the lease runs out first the
//! work is dropped before anything is written.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use keepsats_accounting::{
    Account, AccountingError, ConversionSnapshot, Currency, EntryDraft, GroupId, HoldRequest, LedgerEntry,
    LedgerType, OpRef, Quote, hold_entry, hold_group, release_group,
};
use keepsats_core::{CustomerId, DomainError};
use keepsats_events::{
    CustomJson, CustomJsonPayload, Forward, Invoice, KeepsatsTransfer, LightningWithdraw, Payment, PaymentStatus,
    TrackedEvent, Transfer,
};

use crate::config::DispatcherSettings;
use crate::external::{RebalanceAdapter, RebalanceDirection};
use crate::hold_release::{HoldRelease, ReleaseOutcome};
use crate::ledger_store::{LedgerStore, LedgerStoreError};
use crate::lock::{CustomerLock, LockError};
use crate::quotes::QuoteHistory;
use crate::tracking::{TrackedEventStore, TrackedRecord, TrackingStoreError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("customer lock busy: {cust_id} (waited {waited_ms} ms)")]
    CustomerLockBusy { cust_id: CustomerId, waited_ms: u64 },
    #[error("customer lock lease expired for {cust_id}")]
    LeaseExpired { cust_id: CustomerId },
    #[error("lock backend error: {0}")]
    LockBackend(String),
    #[error(transparent)]
    Store(#[from] LedgerStoreError),
    #[error(transparent)]
    Tracking(#[from] TrackingStoreError),
    #[error(transparent)]
    Accounting(#[from] AccountingError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no quote available to price an event at {at}")]
    NoQuote { at: DateTime<Utc> },
    #[error("insufficient funds for {cust_id}: needs {needed} {unit}, has {available}")]
    InsufficientFunds {
        cust_id: CustomerId,
        unit: Currency,
        needed: Decimal,
        available: Decimal,
    },
}

impl From<LockError> for DispatchError {
    fn from(value: LockError) -> Self {
        match value {
            LockError::CustomerLockBusy { cust_id, waited_ms } => DispatchError::CustomerLockBusy { cust_id, waited_ms },
            LockError::LeaseExpired { cust_id } => DispatchError::LeaseExpired { cust_id },
            LockError::Backend(msg) => DispatchError::LockBackend(msg),
        }
    }
}

impl DispatchError {
    /// Whether redelivering the same event later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::CustomerLockBusy { .. }
            | DispatchError::LeaseExpired { .. }
            | DispatchError::LockBackend(_)
            | DispatchError::NoQuote { .. }
            | DispatchError::Store(LedgerStoreError::Storage(_))
            | DispatchError::Tracking(TrackingStoreError::Storage(_)) => true,
            DispatchError::Store(_)
            | DispatchError::Tracking(_)
            | DispatchError::Accounting(_)
            | DispatchError::Domain(_)
            | DispatchError::InsufficientFunds { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Entries written for this event, in write order.
    Processed { entries: Vec<LedgerEntry> },
    /// The event was already ledgered; nothing written.
    Duplicate,
    /// The event needs no ledger entry.
    Ignored { reason: String },
    /// A release was due but its hold does not exist; nothing written.
    MissingHold,
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Processed { .. } => "processed",
            DispatchOutcome::Duplicate => "duplicate",
            DispatchOutcome::Ignored { .. } => "ignored",
            DispatchOutcome::MissingHold => "missing_hold",
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        match self {
            DispatchOutcome::Processed { entries } => entries,
            _ => &[],
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, DispatchOutcome::Processed { .. })
    }
}

/// Turns tracked events into ledger entries. Cheap to share behind an `Arc`;
/// any number of workers may call [`TransactionDispatcher::process_tracked_event`]
/// concurrently.
pub struct TransactionDispatcher {
    ledger: Arc<dyn LedgerStore>,
    tracking: Arc<dyn TrackedEventStore>,
    lock: CustomerLock,
    holds: HoldRelease,
    quotes: Arc<QuoteHistory>,
    rebalance: Option<Arc<dyn RebalanceAdapter>>,
    server: CustomerId,
    node: CustomerId,
    settings: DispatcherSettings,
}

impl TransactionDispatcher {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        tracking: Arc<dyn TrackedEventStore>,
        lock: CustomerLock,
        quotes: Arc<QuoteHistory>,
        server: CustomerId,
        node: CustomerId,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            holds: HoldRelease::new(ledger.clone()),
            ledger,
            tracking,
            lock,
            quotes,
            rebalance: None,
            server,
            node,
            settings,
        }
    }

    pub fn with_rebalance(mut self, adapter: Arc<dyn RebalanceAdapter>) -> Self {
        self.rebalance = Some(adapter);
        self
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn lock(&self) -> &CustomerLock {
        &self.lock
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Ledger one tracked event. Safe to call any number of times with the
    /// same event.
    #[instrument(skip_all, fields(event_id = %event.event_id(), kind = event.kind()))]
    pub async fn process_tracked_event(&self, event: &TrackedEvent) -> Result<DispatchOutcome, DispatchError> {
        let event_id = event.event_id();
        let mut summary = Summary::new(event, &event_id);
        let result = self.dispatch(event, &event_id, &mut summary).await;
        summary.emit(&result);
        result
    }

    async fn dispatch(
        &self,
        event: &TrackedEvent,
        event_id: &str,
        summary: &mut Summary<'_>,
    ) -> Result<DispatchOutcome, DispatchError> {
        if self.tracking.exists(event_id).await? {
            return Ok(DispatchOutcome::Duplicate);
        }
        let route = match self.route(event, event_id).await? {
            Routing::Ledger(route) => route,
            Routing::Ignore(reason) => {
                self.tracking
                    .record(&TrackedRecord::new(event, None, format!("ignored: {reason}"), 0))
                    .await?;
                return Ok(DispatchOutcome::Ignored { reason });
            }
            Routing::MissingHold => return Ok(DispatchOutcome::MissingHold),
        };
        summary.cust_id = Some(route.cust_id.clone());
        summary.ledger_type = Some(route.action.ledger_type());

        if self.already_processed(event_id, &route.primary).await? {
            return Ok(DispatchOutcome::Duplicate);
        }

        let this = self;
        let route = &route;
        let (outcome, rebalance) = self
            .lock
            .run_locked(&route.cust_id, || async move {
                if this.already_processed(event_id, &route.primary).await? {
                    return Ok((DispatchOutcome::Duplicate, None));
                }
                let built = this.build(event, event_id, route).await?;
                this.persist(event, &route.cust_id, built).await
            })
            .await?;

        if let Some(order) = rebalance {
            summary.rebalance = Some(self.request_rebalance(order).await);
        }
        Ok(outcome)
    }

    async fn already_processed(&self, event_id: &str, primary: &GroupId) -> Result<bool, DispatchError> {
        if self.tracking.exists(event_id).await? {
            return Ok(true);
        }
        Ok(self.ledger.group_exists(primary).await?)
    }

    async fn route<'a>(&self, event: &'a TrackedEvent, event_id: &str) -> Result<Routing<'a>, DispatchError> {
        let routing = match event {
            TrackedEvent::Transfer(t) | TrackedEvent::RecurrentTransfer(t) => self.route_transfer(t, event_id),
            TrackedEvent::CustomJson(c) => route_custom_json(c, event_id),
            TrackedEvent::Invoice(i) => route_invoice(i, event_id),
            TrackedEvent::Payment(p) => return self.route_payment(p).await,
            TrackedEvent::Forward(f) => self.route_forward(f, event_id),
        };
        Ok(routing)
    }

    fn route_transfer<'a>(&self, t: &'a Transfer, event_id: &str) -> Routing<'a> {
        if !t.unit.is_on_chain() {
            return Routing::Ignore(format!("transfer unit {} is not a chain asset", t.unit));
        }
        if t.to == self.server && t.from != self.server {
            Routing::Ledger(Route {
                cust_id: t.from.clone(),
                primary: GroupId::for_phase(event_id, LedgerType::DepositHive),
                action: Action::DepositHive(t),
            })
        } else if t.from == self.server && t.to != self.server {
            Routing::Ledger(Route {
                cust_id: t.to.clone(),
                primary: GroupId::for_phase(event_id, LedgerType::WithdrawHive),
                action: Action::WithdrawHive(t),
            })
        } else {
            Routing::Ignore("transfer does not involve the server account".to_string())
        }
    }

    async fn route_payment<'a>(&self, p: &'a Payment) -> Result<Routing<'a>, DispatchError> {
        let (origin, succeeded) = match (p.status, p.origin_id.as_deref()) {
            (PaymentStatus::InFlight, _) => return Ok(Routing::Ignore("payment in flight".to_string())),
            (_, None) => return Ok(Routing::Ignore("payment has no originating hold".to_string())),
            (PaymentStatus::Succeeded, Some(origin)) => (origin, true),
            (PaymentStatus::Failed, Some(origin)) => (origin, false),
        };
        // The hold decides whose liability moves; the payment's own
        // cust_id is only a cross-check.
        let Some(hold) = self.holds.find_hold(origin).await? else {
            return Ok(Routing::MissingHold);
        };
        let cust_id = hold.cust_id;
        if let Some(claimed) = p.cust_id.as_ref().filter(|c| **c != cust_id) {
            warn!(
                group_root = origin,
                hold_cust_id = %cust_id,
                payment_cust_id = %claimed,
                "payment names a different customer than its hold"
            );
            return Ok(Routing::Ignore(format!(
                "payment names {claimed} but hold {origin} belongs to {cust_id}"
            )));
        }
        let route = if succeeded {
            Route {
                cust_id,
                primary: GroupId::for_phase(origin, LedgerType::WithdrawLightning),
                action: Action::PaymentSucceeded { payment: p, origin },
            }
        } else {
            Route {
                cust_id,
                primary: release_group(origin),
                action: Action::PaymentFailed { origin },
            }
        };
        Ok(Routing::Ledger(route))
    }

    fn route_forward<'a>(&self, f: &'a Forward, event_id: &str) -> Routing<'a> {
        if !f.settled {
            return Routing::Ignore("forward not settled".to_string());
        }
        if f.fee_msat <= Decimal::ZERO {
            return Routing::Ignore("forward earned no fee".to_string());
        }
        Routing::Ledger(Route {
            cust_id: self.node.clone(),
            primary: GroupId::for_phase(event_id, LedgerType::ForwardFee),
            action: Action::ForwardFee(f),
        })
    }

    async fn build(&self, event: &TrackedEvent, event_id: &str, route: &Route<'_>) -> Result<Built, DispatchError> {
        let at = event.occurred_at();
        let ctx = Ctx {
            event_id,
            kind: event.kind(),
            cust_id: &route.cust_id,
            at,
            quote: self.quotes.nearest(at, self.settings.quote_window()),
        };
        match &route.action {
            Action::DepositHive(t) => self.deposit_hive(&ctx, t),
            Action::WithdrawHive(t) => Ok(Built::entries(vec![ctx.post(Leg {
                ledger_type: LedgerType::WithdrawHive,
                group_id: GroupId::for_phase(event_id, LedgerType::WithdrawHive),
                debit: Account::customer_liability(ctx.cust_id),
                credit: Account::customer_deposits_hive(&self.server),
                unit: t.unit,
                amount: t.amount,
                description: format!("Withdraw {} {} to {}", t.amount, t.unit, t.to),
            })?])),
            Action::KeepsatsTransfer(kt) => self.keepsats_transfer(&ctx, kt).await,
            Action::LightningWithdraw(w) => self.lightning_withdraw(&ctx, w).await,
            Action::DepositKeepsats { invoice, amount } => Ok(Built::entries(vec![ctx.post(Leg {
                ledger_type: LedgerType::DepositKeepsats,
                group_id: GroupId::for_phase(event_id, LedgerType::DepositKeepsats),
                debit: Account::treasury_lightning(&self.node),
                credit: Account::customer_liability(ctx.cust_id),
                unit: Currency::Msats,
                amount: *amount,
                description: format!("Lightning deposit {amount} msats (invoice {})", invoice.add_index),
            })?])),
            Action::PaymentSucceeded { payment, origin } => self.payment_succeeded(&ctx, payment, origin).await,
            Action::PaymentFailed { origin } => {
                match self.holds.plan_release(origin, ctx.at, ctx.op()).await? {
                    ReleaseOutcome::Released(release) => Ok(Built::entries(vec![release])),
                    ReleaseOutcome::AlreadyReleased(_) => Ok(Built::Duplicate),
                    ReleaseOutcome::MissingHold => Ok(Built::MissingHold),
                }
            }
            Action::ForwardFee(f) => Ok(Built::entries(vec![ctx.post(Leg {
                ledger_type: LedgerType::ForwardFee,
                group_id: GroupId::for_phase(event_id, LedgerType::ForwardFee),
                debit: Account::treasury_lightning(&self.node),
                credit: Account::fee_income_lightning(&self.node),
                unit: Currency::Msats,
                amount: f.fee_msat,
                description: format!(
                    "Forward fee {} -> {}",
                    f.incoming_channel_id, f.outgoing_channel_id
                ),
            })?])),
        }
    }

    fn deposit_hive(&self, ctx: &Ctx<'_>, t: &Transfer) -> Result<Built, DispatchError> {
        let cust = ctx.cust_id;
        let mut entries = vec![ctx.post(Leg {
            ledger_type: LedgerType::DepositHive,
            group_id: GroupId::for_phase(ctx.event_id, LedgerType::DepositHive),
            debit: Account::customer_deposits_hive(&self.server),
            credit: Account::customer_liability(cust),
            unit: t.unit,
            amount: t.amount,
            description: format!("Deposit {} {} from {}", t.amount, t.unit, cust),
        })?];
        if !t.wants_keepsats() {
            return Ok(Built::entries(entries));
        }

        let msats = ctx.conv(t.unit, t.amount)?.value(Currency::Msats);
        if msats <= Decimal::ZERO {
            debug!(event_id = ctx.event_id, "deposit too small to convert");
            return Ok(Built::entries(entries));
        }
        entries.push(ctx.post(Leg {
            ledger_type: LedgerType::ExchangeConversion,
            group_id: GroupId::for_leg(ctx.event_id, LedgerType::ExchangeConversion, t.unit.as_str()),
            debit: Account::customer_liability(cust),
            credit: Account::converted_keepsats_offset(&self.server),
            unit: t.unit,
            amount: t.amount,
            description: format!("Convert {} {} to keepsats", t.amount, t.unit),
        })?);
        entries.push(ctx.post(Leg {
            ledger_type: LedgerType::ExchangeConversion,
            group_id: GroupId::for_leg(ctx.event_id, LedgerType::ExchangeConversion, Currency::Msats.as_str()),
            debit: Account::converted_keepsats_offset(&self.server),
            credit: Account::customer_liability(cust),
            unit: Currency::Msats,
            amount: msats,
            description: format!("Keepsats from {} {}", t.amount, t.unit),
        })?);
        let fee = self.conversion_fee(msats);
        if fee > Decimal::ZERO {
            entries.push(ctx.post(Leg {
                ledger_type: LedgerType::ConversionFee,
                group_id: GroupId::for_phase(ctx.event_id, LedgerType::ConversionFee),
                debit: Account::customer_liability(cust),
                credit: Account::fee_income_keepsats(&self.server),
                unit: Currency::Msats,
                amount: fee,
                description: format!("Conversion fee {fee} msats"),
            })?);
        }
        Ok(Built::Entries {
            entries,
            rebalance: Some(RebalanceOrder {
                direction: RebalanceDirection::Sell,
                base: t.unit,
                qty: t.amount,
                transaction_id: ctx.event_id.to_string(),
            }),
        })
    }

    fn conversion_fee(&self, msats: Decimal) -> Decimal {
        let proportional = (msats * Decimal::from(self.settings.conversion_fee_ppm) / Decimal::from(1_000_000u64)).trunc();
        (Decimal::from(self.settings.conversion_fee_base_msats) + proportional).min(msats)
    }

    async fn keepsats_transfer(&self, ctx: &Ctx<'_>, kt: &KeepsatsTransfer) -> Result<Built, DispatchError> {
        self.ensure_funds(ctx.cust_id, Currency::Msats, kt.msats).await?;
        Ok(Built::entries(vec![ctx.post(Leg {
            ledger_type: LedgerType::CustomJsonTransfer,
            group_id: GroupId::for_phase(ctx.event_id, LedgerType::CustomJsonTransfer),
            debit: Account::customer_liability(&kt.from),
            credit: Account::customer_liability(&kt.to),
            unit: Currency::Msats,
            amount: kt.msats,
            description: format!("Keepsats transfer {} -> {}", kt.from, kt.to),
        })?]))
    }

    async fn lightning_withdraw(&self, ctx: &Ctx<'_>, w: &LightningWithdraw) -> Result<Built, DispatchError> {
        self.ensure_funds(ctx.cust_id, Currency::Msats, w.msats).await?;
        let hold = hold_entry(HoldRequest {
            cust_id: ctx.cust_id.clone(),
            group_root: ctx.event_id.to_string(),
            timestamp: ctx.at,
            op: ctx.op(),
            description: format!("Hold {} msats for Lightning payment", w.msats),
            unit: Currency::Msats,
            amount: w.msats,
            conv: ctx.conv(Currency::Msats, w.msats)?,
        })?;
        Ok(Built::entries(vec![hold]))
    }

    async fn payment_succeeded(&self, ctx: &Ctx<'_>, p: &Payment, origin: &str) -> Result<Built, DispatchError> {
        let mut entries = Vec::new();
        let covered = match self.holds.plan_release(origin, ctx.at, ctx.op()).await? {
            ReleaseOutcome::Released(release) => {
                let amount = release.credit_amount;
                entries.push(release);
                amount
            }
            ReleaseOutcome::AlreadyReleased(_) => {
                warn!(group_root = origin, "payment succeeded after its hold was released");
                Decimal::ZERO
            }
            ReleaseOutcome::MissingHold => return Ok(Built::MissingHold),
        };
        // Whatever the hold does not cover must already sit in the liability.
        let uncovered = p.value_msat - covered;
        if uncovered > Decimal::ZERO {
            self.ensure_funds(ctx.cust_id, Currency::Msats, uncovered).await?;
        }
        entries.push(ctx.post(Leg {
            ledger_type: LedgerType::WithdrawLightning,
            group_id: GroupId::for_phase(origin, LedgerType::WithdrawLightning),
            debit: Account::customer_liability(ctx.cust_id),
            credit: Account::treasury_lightning(&self.node),
            unit: Currency::Msats,
            amount: p.value_msat,
            description: format!("Lightning payment {}", p.payment_hash),
        })?);
        if p.fee_msat > Decimal::ZERO {
            entries.push(ctx.post(Leg {
                ledger_type: LedgerType::LightningFee,
                group_id: GroupId::for_phase(origin, LedgerType::LightningFee),
                debit: Account::lightning_network_fees(&self.node),
                credit: Account::treasury_lightning(&self.node),
                unit: Currency::Msats,
                amount: p.fee_msat,
                description: format!("Routing fee for {}", p.payment_hash),
            })?);
        }
        Ok(Built::entries(entries))
    }

    /// Customer liability available to spend in `unit`. Held amounts are
    /// already debited from the liability, so they are excluded.
    async fn ensure_funds(&self, cust_id: &CustomerId, unit: Currency, needed: Decimal) -> Result<(), DispatchError> {
        let available = self
            .ledger
            .account_balance(&Account::customer_liability(cust_id), unit)
            .await?;
        if available < needed {
            return Err(DispatchError::InsufficientFunds {
                cust_id: cust_id.clone(),
                unit,
                needed,
                available,
            });
        }
        Ok(())
    }

    async fn persist(
        &self,
        event: &TrackedEvent,
        cust_id: &CustomerId,
        built: Built,
    ) -> Result<(DispatchOutcome, Option<RebalanceOrder>), DispatchError> {
        let (entries, rebalance) = match built {
            Built::Entries { entries, rebalance } => (entries, rebalance),
            Built::Duplicate => return Ok((DispatchOutcome::Duplicate, None)),
            Built::MissingHold => return Ok((DispatchOutcome::MissingHold, None)),
        };
        match self.ledger.insert_batch(&entries).await {
            Ok(()) => {}
            Err(LedgerStoreError::Duplicate { .. }) => return Ok((DispatchOutcome::Duplicate, None)),
            Err(e) => return Err(e.into()),
        }
        self.tracking
            .record(&TrackedRecord::new(event, Some(cust_id.clone()), "processed", entries.len()))
            .await?;
        Ok((DispatchOutcome::Processed { entries }, rebalance))
    }

    /// Best effort; a failure is logged and never fails the event.
    async fn request_rebalance(&self, order: RebalanceOrder) -> &'static str {
        let Some(adapter) = &self.rebalance else {
            return "skipped";
        };
        let result = adapter
            .add_pending_rebalance(order.direction, order.base, Currency::Btc, order.qty, &order.transaction_id)
            .await;
        match result {
            Ok(r) if r.error.is_none() => {
                debug!(executed = r.executed, pending_qty = %r.pending_qty, "rebalance queued");
                if r.executed { "executed" } else { "pending" }
            }
            Ok(r) => {
                warn!(transaction_id = %order.transaction_id, error = r.error.as_deref().unwrap_or(""), "rebalance rejected");
                "failed"
            }
            Err(e) => {
                warn!(transaction_id = %order.transaction_id, error = %e, "rebalance request failed");
                "failed"
            }
        }
    }
}

fn route_custom_json<'a>(c: &'a CustomJson, event_id: &str) -> Routing<'a> {
    if let CustomJsonPayload::Unknown { id } = &c.payload {
        return Routing::Ignore(format!("unhandled custom_json id {id}"));
    }
    let Some(sender) = c.authorised_sender() else {
        return Routing::Ignore("custom_json not signed by its sender".to_string());
    };
    match &c.payload {
        CustomJsonPayload::KeepsatsTransfer(kt) if kt.from == kt.to => {
            Routing::Ignore("keepsats transfer to self".to_string())
        }
        CustomJsonPayload::KeepsatsTransfer(kt) => Routing::Ledger(Route {
            cust_id: sender.clone(),
            primary: GroupId::for_phase(event_id, LedgerType::CustomJsonTransfer),
            action: Action::KeepsatsTransfer(kt),
        }),
        CustomJsonPayload::LightningWithdraw(w) => Routing::Ledger(Route {
            cust_id: sender.clone(),
            primary: hold_group(event_id),
            action: Action::LightningWithdraw(w),
        }),
        CustomJsonPayload::Unknown { id } => Routing::Ignore(format!("unhandled custom_json id {id}")),
    }
}

fn route_invoice<'a>(i: &'a Invoice, event_id: &str) -> Routing<'a> {
    if !i.is_settled() {
        return Routing::Ignore("invoice not settled".to_string());
    }
    let Some(cust_id) = i.memo_customer() else {
        return Routing::Ignore("invoice memo names no customer".to_string());
    };
    let amount = if i.amt_paid_msat > Decimal::ZERO { i.amt_paid_msat } else { i.value_msat };
    if amount <= Decimal::ZERO {
        return Routing::Ignore("invoice carries no value".to_string());
    }
    Routing::Ledger(Route {
        cust_id,
        primary: GroupId::for_phase(event_id, LedgerType::DepositKeepsats),
        action: Action::DepositKeepsats { invoice: i, amount },
    })
}

enum Routing<'a> {
    Ledger(Route<'a>),
    Ignore(String),
    MissingHold,
}

struct Route<'a> {
    cust_id: CustomerId,
    /// Group id of the first entry the event writes; its presence means the
    /// event was already ledgered.
    primary: GroupId,
    action: Action<'a>,
}

enum Action<'a> {
    DepositHive(&'a Transfer),
    WithdrawHive(&'a Transfer),
    KeepsatsTransfer(&'a KeepsatsTransfer),
    LightningWithdraw(&'a LightningWithdraw),
    DepositKeepsats { invoice: &'a Invoice, amount: Decimal },
    PaymentSucceeded { payment: &'a Payment, origin: &'a str },
    PaymentFailed { origin: &'a str },
    ForwardFee(&'a Forward),
}

impl Action<'_> {
    fn ledger_type(&self) -> LedgerType {
        match self {
            Action::DepositHive(_) => LedgerType::DepositHive,
            Action::WithdrawHive(_) => LedgerType::WithdrawHive,
            Action::KeepsatsTransfer(_) => LedgerType::CustomJsonTransfer,
            Action::LightningWithdraw(_) => LedgerType::HoldKeepsats,
            Action::DepositKeepsats { .. } => LedgerType::DepositKeepsats,
            Action::PaymentSucceeded { .. } => LedgerType::WithdrawLightning,
            Action::PaymentFailed { .. } => LedgerType::ReleaseKeepsats,
            Action::ForwardFee(_) => LedgerType::ForwardFee,
        }
    }
}

enum Built {
    Entries {
        entries: Vec<LedgerEntry>,
        rebalance: Option<RebalanceOrder>,
    },
    Duplicate,
    MissingHold,
}

impl Built {
    fn entries(entries: Vec<LedgerEntry>) -> Self {
        Built::Entries {
            entries,
            rebalance: None,
        }
    }
}

struct RebalanceOrder {
    direction: RebalanceDirection,
    base: Currency,
    qty: Decimal,
    transaction_id: String,
}

/// Per-event values shared by every entry the event writes.
struct Ctx<'a> {
    event_id: &'a str,
    kind: &'static str,
    cust_id: &'a CustomerId,
    at: DateTime<Utc>,
    quote: Option<Quote>,
}

struct Leg {
    ledger_type: LedgerType,
    group_id: GroupId,
    debit: Account,
    credit: Account,
    unit: Currency,
    amount: Decimal,
    description: String,
}

impl Ctx<'_> {
    fn op(&self) -> OpRef {
        OpRef::new(self.event_id, self.kind)
    }

    fn conv(&self, unit: Currency, amount: Decimal) -> Result<ConversionSnapshot, DispatchError> {
        let quote = self.quote.as_ref().ok_or(DispatchError::NoQuote { at: self.at })?;
        Ok(ConversionSnapshot::compute(unit, amount, quote)?)
    }

    fn post(&self, leg: Leg) -> Result<LedgerEntry, DispatchError> {
        let conv = self.conv(leg.unit, leg.amount)?;
        Ok(LedgerEntry::new(EntryDraft {
            cust_id: self.cust_id.clone(),
            ledger_type: leg.ledger_type,
            group_id: leg.group_id,
            timestamp: self.at,
            op: self.op(),
            description: leg.description,
            debit: leg.debit,
            credit: leg.credit,
            unit: leg.unit,
            amount: leg.amount,
            conv,
        })?)
    }
}

/// The single log line every dispatched event produces.
struct Summary<'a> {
    event: &'a TrackedEvent,
    event_id: &'a str,
    cust_id: Option<CustomerId>,
    ledger_type: Option<LedgerType>,
    rebalance: Option<&'static str>,
    started: Instant,
}

impl<'a> Summary<'a> {
    fn new(event: &'a TrackedEvent, event_id: &'a str) -> Self {
        Self {
            event,
            event_id,
            cust_id: None,
            ledger_type: None,
            rebalance: None,
            started: Instant::now(),
        }
    }

    fn emit(&self, result: &Result<DispatchOutcome, DispatchError>) {
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let kind = self.event.kind();
        let cust_id = self.cust_id.as_ref().map(CustomerId::as_str).unwrap_or("-");
        let ledger_type = self.ledger_type.map(LedgerType::as_str).unwrap_or("-");
        match result {
            Ok(DispatchOutcome::MissingHold) => warn!(
                event_id = self.event_id,
                kind,
                cust_id,
                ledger_type,
                outcome = "missing_hold",
                elapsed_ms,
                "tracked event dispatched"
            ),
            Ok(outcome) => {
                let reason = match outcome {
                    DispatchOutcome::Ignored { reason } => reason.as_str(),
                    _ => "",
                };
                info!(
                    event_id = self.event_id,
                    kind,
                    cust_id,
                    ledger_type,
                    outcome = outcome.label(),
                    entries = outcome.entries().len(),
                    reason,
                    rebalance = self.rebalance.unwrap_or("-"),
                    elapsed_ms,
                    "tracked event dispatched"
                )
            }
            Err(e) if e.is_retryable() => warn!(
                event_id = self.event_id,
                kind,
                cust_id,
                ledger_type,
                error = %e,
                retryable = true,
                elapsed_ms,
                "tracked event failed"
            ),
            Err(e) => error!(
                event_id = self.event_id,
                kind,
                cust_id,
                ledger_type,
                error = %e,
                retryable = false,
                elapsed_ms,
                "tracked event failed"
            ),
        }
    }
}
