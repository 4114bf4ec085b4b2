//! Infrastructure layer: stores, locks, dispatch, reconciliation.

pub mod config;
pub mod dispatcher;
pub mod external;
pub mod hold_release;
pub mod ledger_store;
pub mod lock;
pub mod quotes;
pub mod sanity;
pub mod tracking;
pub mod worker;

#[cfg(test)]
mod test_support;


pub use config::{ConfigError, DispatcherSettings, LockSettings, SanitySettings, Settings};
pub use dispatcher::{DispatchError, DispatchOutcome, TransactionDispatcher};
pub use hold_release::{HoldRelease, ReleaseOutcome};
pub use ledger_store::{InMemoryLedgerStore, LedgerQuery, LedgerStore, LedgerStoreError, PostgresLedgerStore};
pub use lock::{CustomerLock, CustomerLockGuard, InMemoryLockService, LockError, LockService};
pub use quotes::QuoteHistory;
pub use sanity::{CheckOutcome, CheckResult, CheckStatus, SanityCheck, SanityCheckEngine, SanityCheckResults};
pub use tracking::{InMemoryTrackedEventStore, PostgresTrackedEventStore, TrackedEventStore, TrackedRecord};
pub use worker::{DispatchWorkerPool, WorkerPoolHandle, WorkerStatsSnapshot};
