//! Interfaces of the systems the engine talks to but does not own: the Hive
//! chain, the Lightning node, the exchange rebalancer and the price feed.

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use keepsats_accounting::{Currency, QuoteResponse};
use keepsats_core::CustomerId;
use keepsats_events::{BusError, Forward, Invoice, Payment, TrackedEvent, TrackedSender};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out")]
    Timeout,
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Liquid balances of one Hive account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainBalances {
    pub hive: Decimal,
    pub hbd: Decimal,
}

impl ChainBalances {
    pub fn get(&self, unit: Currency) -> Option<Decimal> {
        match unit {
            Currency::Hive => Some(self.hive),
            Currency::Hbd => Some(self.hbd),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ChainBalanceSource: Send + Sync {
    async fn account_balances(&self, account: &CustomerId) -> Result<ChainBalances, ExternalError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub pub_key: String,
    pub alias: String,
    pub num_active_channels: u32,
    pub synced_to_chain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeBalance {
    /// Spendable side of all open channels.
    pub channel_local_msats: Decimal,
    pub channel_remote_msats: Decimal,
    pub onchain_confirmed_sats: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub payment_request: String,
    pub amount_msat: Decimal,
    pub fee_limit_msat: Decimal,
    /// Event id of the hold funding the payment; echoed back as
    /// `Payment::origin_id`.
    pub origin_id: String,
    pub cust_id: CustomerId,
    pub timeout_secs: u64,
}

/// The Lightning node RPC surface the engine uses.
#[async_trait]
pub trait LightningNode: Send + Sync {
    /// Info about `pub_key`, or the local node when `None`.
    async fn get_node_info(&self, pub_key: Option<&str>) -> Result<NodeInfo, ExternalError>;

    async fn wallet_balance(&self) -> Result<NodeBalance, ExternalError>;

    fn subscribe_invoices(&self) -> BoxStream<'static, Result<Invoice, ExternalError>>;

    fn subscribe_htlc_events(&self) -> BoxStream<'static, Result<Forward, ExternalError>>;

    /// Start a payment; the stream yields each status update.
    fn send_payment(&self, request: PaymentRequest) -> BoxStream<'static, Result<Payment, ExternalError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceDirection {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RebalanceResult {
    pub executed: bool,
    /// Quantity accumulated but not yet traded.
    pub pending_qty: Decimal,
    pub error: Option<String>,
}

#[async_trait]
pub trait RebalanceAdapter: Send + Sync {
    async fn add_pending_rebalance(
        &self,
        direction: RebalanceDirection,
        base: Currency,
        quote: Currency,
        qty: Decimal,
        transaction_id: &str,
    ) -> Result<RebalanceResult, ExternalError>;
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn get_all_quotes(&self) -> Result<QuoteResponse, ExternalError>;
}

/// Forward a collaborator stream into the dispatcher channel until either
/// side ends. Stream errors are logged and skipped. Returns how many events
/// were sent.
pub async fn pump<S, T>(mut stream: S, sender: &TrackedSender) -> Result<usize, BusError>
where
    S: Stream<Item = Result<T, ExternalError>> + Unpin,
    T: Into<TrackedEvent>,
{
    let mut sent = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(item) => {
                let event: TrackedEvent = item.into();
                sender.send(event).await?;
                sent += 1;
            }
            Err(e) => warn!(error = %e, "collaborator stream error; skipping item"),
        }
    }
    debug!(sent, "collaborator stream ended");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::forward;
    use futures::stream;
    use keepsats_events::channel;

    #[tokio::test]
    async fn pump_forwards_ok_items_and_skips_errors() {
        let (tx, rx) = channel(8);
        let items = vec![
            Ok(forward(1, 1)),
            Err(ExternalError::Timeout),
            Ok(forward(1, 2)),
        ];
        let sent = pump(stream::iter(items), &tx).await.unwrap();
        assert_eq!(sent, 2);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.event().event_id(), "forward_1_1");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event().event_id(), "forward_1_2");
    }

    #[tokio::test]
    async fn pump_stops_when_channel_closes() {
        let (tx, rx) = channel(1);
        drop(rx);
        let items: Vec<Result<Forward, ExternalError>> = vec![Ok(forward(1, 1))];
        assert!(pump(stream::iter(items), &tx).await.is_err());
    }

    #[test]
    fn chain_balances_only_know_chain_units() {
        let b = ChainBalances {
            hive: Decimal::ONE,
            hbd: Decimal::TWO,
        };
        assert_eq!(b.get(Currency::Hbd), Some(Decimal::TWO));
        assert_eq!(b.get(Currency::Sats), None);
    }
}
