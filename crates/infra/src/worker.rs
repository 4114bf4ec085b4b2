//! Dispatch workers: N tasks competing for envelopes on one channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use keepsats_events::{TrackedEnvelope, TrackedReceiver};

use crate::config::DispatcherSettings;
use crate::dispatcher::{DispatchOutcome, TransactionDispatcher};

/// Handle to a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    workers: JoinSet<()>,
    stats: Arc<WorkerStats>,
}

impl WorkerPoolHandle {
    /// Stop taking new envelopes and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) -> WorkerStatsSnapshot {
        let _ = self.shutdown.send(true);
        while self.workers.join_next().await.is_some() {}
        self.stats.snapshot()
    }

    /// Wait until every sender is dropped and the queue is drained.
    pub async fn join(mut self) -> WorkerStatsSnapshot {
        while self.workers.join_next().await.is_some() {}
        self.stats.snapshot()
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    processed: AtomicU64,
    duplicates: AtomicU64,
    ignored: AtomicU64,
    missing_holds: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    fn record(&self, outcome: &DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Processed { .. } => &self.processed,
            DispatchOutcome::Duplicate => &self.duplicates,
            DispatchOutcome::Ignored { .. } => &self.ignored,
            DispatchOutcome::MissingHold => &self.missing_holds,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            missing_holds: self.missing_holds.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub duplicates: u64,
    pub ignored: u64,
    pub missing_holds: u64,
    pub retried: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

/// Runs the dispatcher over a [`TrackedReceiver`].
///
/// Retryable failures (busy customer lock, storage hiccups) are retried in
/// place with linear backoff up to `max_attempts`; other failures are logged
/// and the envelope is dropped. Delivery upstream is at-least-once, so a
/// dropped envelope is picked up again when its source replays.
#[derive(Debug)]
pub struct DispatchWorkerPool;

impl DispatchWorkerPool {
    pub fn spawn(
        dispatcher: Arc<TransactionDispatcher>,
        receiver: TrackedReceiver,
        settings: &DispatcherSettings,
    ) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(WorkerStats::default());
        let policy = RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            backoff: settings.retry_backoff(),
        };

        let mut workers = JoinSet::new();
        for worker in 0..settings.workers.max(1) {
            workers.spawn(worker_loop(
                worker,
                dispatcher.clone(),
                receiver.clone(),
                shutdown_rx.clone(),
                stats.clone(),
                policy,
            ));
        }
        info!(workers = settings.workers.max(1), "dispatch workers started");

        WorkerPoolHandle {
            shutdown: shutdown_tx,
            workers,
            stats,
        }
    }
}

async fn worker_loop(
    worker: usize,
    dispatcher: Arc<TransactionDispatcher>,
    receiver: TrackedReceiver,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<WorkerStats>,
    policy: RetryPolicy,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = receiver.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        handle(worker, &dispatcher, envelope, &stats, policy).await;
    }
    debug!(worker, "dispatch worker stopped");
}

async fn handle(
    worker: usize,
    dispatcher: &TransactionDispatcher,
    mut envelope: TrackedEnvelope,
    stats: &WorkerStats,
    policy: RetryPolicy,
) {
    loop {
        match dispatcher.process_tracked_event(envelope.event()).await {
            Ok(outcome) => {
                stats.record(&outcome);
                return;
            }
            Err(e) if e.is_retryable() && envelope.attempt() < policy.max_attempts => {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(policy.backoff * envelope.attempt()).await;
                envelope = envelope.next_attempt();
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker,
                    event_id = %envelope.event().event_id(),
                    attempts = envelope.attempt(),
                    error = %e,
                    "dropping tracked event"
                );
                return;
            }
        }
    }
}
