use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::RwLock;

use keepsats_events::{TrackedSender, channel};
use keepsats_infra::external::{ChainBalanceSource, LightningNode, RebalanceAdapter};
use keepsats_infra::sanity::{
    BalanceSheetCheck, HeldBalancesCheck, HoldReleasePairingCheck, NodeBalanceCheck, ServerHiveBalanceCheck,
};
use keepsats_infra::tracking::TrackingStoreError;
use keepsats_infra::{
    ConfigError, CustomerLock, DispatchWorkerPool, InMemoryLedgerStore, InMemoryLockService,
    InMemoryTrackedEventStore, LedgerStore, LedgerStoreError, LockError, LockService, PostgresLedgerStore,
    PostgresTrackedEventStore, QuoteHistory, SanityCheckEngine, SanityCheckResults, Settings, TrackedEventStore,
    TransactionDispatcher, WorkerPoolHandle,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerStoreError),
    #[error(transparent)]
    Tracking(#[from] TrackingStoreError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Systems outside this process. Any of them may be absent; checks that
/// need a missing one are left out of the sanity run.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub chain: Option<Arc<dyn ChainBalanceSource>>,
    pub node: Option<Arc<dyn LightningNode>>,
    pub rebalance: Option<Arc<dyn RebalanceAdapter>>,
}

/// Everything the handlers reach through `Extension`.
pub struct AppServices {
    pub settings: Settings,
    pub ledger: Arc<dyn LedgerStore>,
    pub tracking: Arc<dyn TrackedEventStore>,
    pub quotes: Arc<QuoteHistory>,
    pub dispatcher: Arc<TransactionDispatcher>,
    pub sanity: Arc<SanityCheckEngine>,
    /// Inbound side of the dispatch channel; stream readers send here too.
    pub events: TrackedSender,
    last_sanity: RwLock<Option<SanityCheckResults>>,
}

impl AppServices {
    /// Run every check now and remember the result.
    pub async fn run_sanity(&self) -> SanityCheckResults {
        let results = self.sanity.run_all_checks().await;
        *self.last_sanity.write().await = Some(results.clone());
        results
    }

    /// The most recent sanity run, running one if none happened yet.
    pub async fn latest_sanity(&self) -> SanityCheckResults {
        if let Some(results) = self.last_sanity.read().await.clone() {
            return results;
        }
        self.run_sanity().await
    }
}

/// Wire stores, locks, dispatcher and sanity engine from `settings`, and
/// start the dispatch workers.
///
/// `database_url` selects Postgres stores, `redis_url` the Redis lock
/// service (with the `redis` feature); otherwise everything is in memory.
pub async fn build_services(
    settings: Settings,
    collaborators: Collaborators,
) -> Result<(Arc<AppServices>, WorkerPoolHandle), BuildError> {
    settings.validate()?;
    let server = settings.server_id()?;
    let node = settings.node_id()?;

    let (ledger, tracking): (Arc<dyn LedgerStore>, Arc<dyn TrackedEventStore>) = match &settings.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let ledger = PostgresLedgerStore::new(pool.clone());
            ledger.migrate().await?;
            let tracking = PostgresTrackedEventStore::new(pool);
            tracking.migrate().await?;
            tracing::info!("using postgres ledger and tracking stores");
            (Arc::new(ledger), Arc::new(tracking))
        }
        None => {
            tracing::info!("using in-memory ledger and tracking stores");
            (
                Arc::new(InMemoryLedgerStore::new()),
                Arc::new(InMemoryTrackedEventStore::new()),
            )
        }
    };

    let lock = CustomerLock::new(lock_service(&settings).await?, settings.lock.clone());
    let quotes = Arc::new(QuoteHistory::new());

    let mut dispatcher = TransactionDispatcher::new(
        ledger.clone(),
        tracking.clone(),
        lock,
        quotes.clone(),
        server.clone(),
        node.clone(),
        settings.dispatcher.clone(),
    );
    if let Some(rebalance) = collaborators.rebalance.clone() {
        dispatcher = dispatcher.with_rebalance(rebalance);
    }
    let dispatcher = Arc::new(dispatcher);

    let sanity = Arc::new(sanity_engine(ledger.clone(), &settings, &collaborators)?);

    let (events, receiver) = channel(settings.dispatcher.channel_capacity);
    let workers = DispatchWorkerPool::spawn(dispatcher.clone(), receiver, &settings.dispatcher);

    let services = AppServices {
        settings,
        ledger,
        tracking,
        quotes,
        dispatcher,
        sanity,
        events,
        last_sanity: RwLock::new(None),
    };
    Ok((Arc::new(services), workers))
}

fn sanity_engine(
    ledger: Arc<dyn LedgerStore>,
    settings: &Settings,
    collaborators: &Collaborators,
) -> Result<SanityCheckEngine, BuildError> {
    let mut engine = SanityCheckEngine::new(ledger, settings.server_id()?, settings.node_id()?, settings.sanity.clone())
        .with_check(BalanceSheetCheck);
    match &collaborators.chain {
        Some(chain) => engine = engine.with_check(ServerHiveBalanceCheck::new(chain.clone())),
        None => tracing::warn!("no chain balance source; server_hive_balance check disabled"),
    }
    match &collaborators.node {
        Some(node) => engine = engine.with_check(NodeBalanceCheck::new(node.clone())),
        None => tracing::warn!("no lightning node client; node_balance check disabled"),
    }
    Ok(engine.with_check(HeldBalancesCheck).with_check(HoldReleasePairingCheck))
}

async fn lock_service(settings: &Settings) -> Result<Arc<dyn LockService>, BuildError> {
    match &settings.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            let service = keepsats_infra::lock::RedisLockService::connect(url).await?;
            tracing::info!("using redis customer locks");
            Ok(Arc::new(service))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!("redis_url set but redis feature not enabled, falling back to in-process locks");
            Ok(Arc::new(InMemoryLockService::new()))
        }
        None => Ok(Arc::new(InMemoryLockService::new())),
    }
}
