//! Builders shared by the crate's tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use keepsats_accounting::{
    Account, ConversionSnapshot, Currency, EntryDraft, GroupId, LedgerEntry, LedgerType, OpRef, Quote,
};
use keepsats_core::CustomerId;
use keepsats_events::{
    CustomJson, CustomJsonPayload, Forward, Invoice, InvoiceState, KeepsatsTransfer, LightningWithdraw, Payment,
    PaymentStatus, TrackedEvent, Transfer,
};

use crate::config::Settings;
use crate::dispatcher::{DispatchOutcome, TransactionDispatcher};
use crate::external::{ExternalError, RebalanceAdapter, RebalanceDirection, RebalanceResult};
use crate::ledger_store::InMemoryLedgerStore;
use crate::lock::{CustomerLock, InMemoryLockService};
use crate::quotes::QuoteHistory;
use crate::tracking::InMemoryTrackedEventStore;

pub const SERVER: &str = "keepsats";
pub const NODE: &str = "lnd";

pub fn cust(name: &str) -> CustomerId {
    CustomerId::parse(name).unwrap()
}

/// 1 HIVE = 0.25 USD, 1 BTC = 100k USD, so 1 HIVE = 250 sats.
pub fn test_quote() -> Quote {
    quote_at(0)
}

pub fn quote_at(offset_secs: i64) -> Quote {
    Quote::from_usd_prices(
        Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap(),
        "test",
        dec!(0.25),
        dec!(1),
        dec!(100000),
    )
    .unwrap()
}

pub fn deposit(name: &str, root: &str, amount: Decimal) -> LedgerEntry {
    LedgerEntry::new(EntryDraft {
        cust_id: cust(name),
        ledger_type: LedgerType::DepositHive,
        group_id: GroupId::for_phase(root, LedgerType::DepositHive),
        timestamp: Utc::now(),
        op: OpRef::new(root, "transfer"),
        description: format!("deposit {root}"),
        debit: Account::customer_deposits_hive(&cust(SERVER)),
        credit: Account::customer_liability(&cust(name)),
        unit: Currency::Hive,
        amount,
        conv: ConversionSnapshot::compute(Currency::Hive, amount, &test_quote()).unwrap(),
    })
    .unwrap()
}

pub fn forward(channel: u64, htlc: u64) -> Forward {
    Forward {
        incoming_channel_id: channel,
        incoming_htlc_id: htlc,
        outgoing_channel_id: channel + 1,
        settled: true,
        amt_in_msat: dec!(100_000),
        fee_msat: dec!(10),
        timestamp: Utc::now(),
    }
}

pub fn forward_event(channel: u64, htlc: u64) -> TrackedEvent {
    TrackedEvent::Forward(forward(channel, htlc))
}

pub fn transfer_event(trx_id: &str, from: &str, to: &str, amount: Decimal, unit: Currency, memo: &str) -> TrackedEvent {
    TrackedEvent::Transfer(Transfer {
        trx_id: trx_id.to_string(),
        op_in_trx: 0,
        block_num: 1,
        timestamp: Utc::now(),
        from: cust(from),
        to: cust(to),
        amount,
        unit,
        memo: memo.to_string(),
    })
}

fn custom_json(trx_id: &str, signer: &str, id: &str, payload: CustomJsonPayload) -> TrackedEvent {
    TrackedEvent::CustomJson(CustomJson {
        trx_id: trx_id.to_string(),
        op_in_trx: 0,
        block_num: 1,
        timestamp: Utc::now(),
        id: id.to_string(),
        required_auths: vec![cust(signer)],
        payload,
    })
}

pub fn keepsats_transfer_event(trx_id: &str, from: &str, to: &str, msats: Decimal) -> TrackedEvent {
    custom_json(
        trx_id,
        from,
        keepsats_events::chain::KEEPSATS_TRANSFER_ID,
        CustomJsonPayload::KeepsatsTransfer(KeepsatsTransfer {
            from: cust(from),
            to: cust(to),
            msats,
            memo: String::new(),
        }),
    )
}

/// Withdrawal request whose hold lands in `{trx_id}_0-HOLD_KEEPSATS`.
pub fn lightning_withdraw_event(trx_id: &str, from: &str, msats: Decimal) -> TrackedEvent {
    custom_json(
        trx_id,
        from,
        keepsats_events::chain::LIGHTNING_WITHDRAW_ID,
        CustomJsonPayload::LightningWithdraw(LightningWithdraw {
            from: cust(from),
            invoice: format!("lnbc{trx_id}"),
            msats,
            memo: String::new(),
        }),
    )
}

pub fn invoice_event(r_hash: &str, memo: &str, msats: Decimal) -> TrackedEvent {
    TrackedEvent::Invoice(Invoice {
        r_hash: r_hash.to_string(),
        add_index: 1,
        state: InvoiceState::Settled,
        value_msat: msats,
        amt_paid_msat: msats,
        memo: memo.to_string(),
        created_at: Utc::now(),
        settled_at: Some(Utc::now()),
    })
}

pub fn payment_event(
    payment_hash: &str,
    status: PaymentStatus,
    origin_id: Option<&str>,
    value_msat: Decimal,
    fee_msat: Decimal,
) -> TrackedEvent {
    TrackedEvent::Payment(Payment {
        payment_hash: payment_hash.to_string(),
        status,
        value_msat,
        fee_msat,
        origin_id: origin_id.map(str::to_string),
        cust_id: None,
        created_at: Utc::now(),
        failure_reason: None,
    })
}

/// Records every rebalance request and reports it pending.
#[derive(Debug, Default)]
pub struct RecordingRebalance {
    orders: Mutex<Vec<(RebalanceDirection, Currency, Decimal, String)>>,
}

impl RecordingRebalance {
    pub fn orders(&self) -> Vec<(RebalanceDirection, Currency, Decimal, String)> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl RebalanceAdapter for RecordingRebalance {
    async fn add_pending_rebalance(
        &self,
        direction: RebalanceDirection,
        base: Currency,
        _quote: Currency,
        qty: Decimal,
        transaction_id: &str,
    ) -> Result<RebalanceResult, ExternalError> {
        self.orders
            .lock()
            .unwrap()
            .push((direction, base, qty, transaction_id.to_string()));
        Ok(RebalanceResult {
            executed: false,
            pending_qty: qty,
            error: None,
        })
    }
}

/// A dispatcher wired to in-memory backends.
pub struct Fixture {
    pub settings: Settings,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub tracking: Arc<InMemoryTrackedEventStore>,
    pub quotes: Arc<QuoteHistory>,
    pub rebalance: Arc<RecordingRebalance>,
    pub dispatcher: Arc<TransactionDispatcher>,
}

impl Fixture {
    pub fn new() -> Self {
        let fx = Self::without_quotes();
        fx.quotes.record(test_quote());
        fx
    }

    pub fn without_quotes() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let tracking = Arc::new(InMemoryTrackedEventStore::new());
        let quotes = Arc::new(QuoteHistory::new());
        let rebalance = Arc::new(RecordingRebalance::default());
        let lock = CustomerLock::new(Arc::new(InMemoryLockService::new()), settings.lock.clone());
        let dispatcher = TransactionDispatcher::new(
            ledger.clone(),
            tracking.clone(),
            lock,
            quotes.clone(),
            settings.server_id().unwrap(),
            settings.node_id().unwrap(),
            settings.dispatcher.clone(),
        )
        .with_rebalance(rebalance.clone());
        Self {
            settings,
            ledger,
            tracking,
            quotes,
            rebalance,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Dispatch and unwrap.
    pub async fn dispatch(&self, event: TrackedEvent) -> DispatchOutcome {
        self.dispatcher.process_tracked_event(&event).await.unwrap()
    }
}

/// A Lightning deposit of `msats` to `name`, stamped `at`, built without the
/// dispatcher so tests can seed long histories quickly.
pub fn keepsats_deposit(name: &str, root: &str, msats: Decimal, at: chrono::DateTime<Utc>) -> LedgerEntry {
    LedgerEntry::new(EntryDraft {
        cust_id: cust(name),
        ledger_type: LedgerType::DepositKeepsats,
        group_id: GroupId::for_phase(root, LedgerType::DepositKeepsats),
        timestamp: at,
        op: OpRef::new(root, "invoice"),
        description: format!("keepsats deposit {root}"),
        debit: Account::treasury_lightning(&cust(NODE)),
        credit: Account::customer_liability(&cust(name)),
        unit: Currency::Msats,
        amount: msats,
        conv: ConversionSnapshot::compute(Currency::Msats, msats, &test_quote()).unwrap(),
    })
    .unwrap()
}

/// Plain-text log lines written while the guard from [`CapturedLogs::install`]
/// is alive on this thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Lines containing every one of `needles`.
    pub fn matching(&self, needles: &[&str]) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| needles.iter().all(|n| l.contains(n)))
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
