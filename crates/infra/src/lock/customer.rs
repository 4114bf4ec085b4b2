use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use keepsats_core::CustomerId;

use super::{LockError, LockService};
use crate::config::LockSettings;

/// Serializes work per customer across every process sharing the backend.
///
/// A lock is a lease: it lapses after `timeout` even if the holder never
/// releases it. Acquisition retries every `poll_interval` until
/// `blocking_timeout`, then fails with [`LockError::CustomerLockBusy`].
#[derive(Clone)]
pub struct CustomerLock {
    service: Arc<dyn LockService>,
    settings: LockSettings,
}

impl std::fmt::Debug for CustomerLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomerLock")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CustomerLock {
    pub fn new(service: Arc<dyn LockService>, settings: LockSettings) -> Self {
        Self { service, settings }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    fn key(&self, cust_id: &CustomerId) -> String {
        format!("{}{}", self.settings.key_prefix, cust_id)
    }

    /// Acquire the lock for `cust_id`. `None` uses the configured lease and
    /// blocking timeouts.
    pub async fn locked(
        &self,
        cust_id: &CustomerId,
        timeout: Option<Duration>,
        blocking_timeout: Option<Duration>,
    ) -> Result<CustomerLockGuard, LockError> {
        let lease = timeout.unwrap_or_else(|| self.settings.timeout());
        let blocking = blocking_timeout.unwrap_or_else(|| self.settings.blocking_timeout());
        let poll = self.settings.poll_interval();
        let key = self.key(cust_id);
        let owner = Uuid::now_v7().to_string();
        let started = Instant::now();

        loop {
            let attempt_at = Instant::now();
            if self.service.try_acquire(&key, &owner, lease).await? {
                debug!(cust_id = %cust_id, lease_ms = super::millis(lease), "customer lock acquired");
                return Ok(CustomerLockGuard {
                    service: self.service.clone(),
                    key,
                    owner,
                    cust_id: cust_id.clone(),
                    expires_at: attempt_at + lease,
                    released: false,
                });
            }
            let waited = started.elapsed();
            if waited >= blocking {
                let waited_ms = super::millis(waited);
                warn!(cust_id = %cust_id, waited_ms, "customer lock busy");
                return Err(LockError::CustomerLockBusy {
                    cust_id: cust_id.clone(),
                    waited_ms,
                });
            }
            tokio::time::sleep(poll.min(blocking - waited)).await;
        }
    }

    /// Run `f` while holding the lock for `cust_id`. `f` is cut off when the
    /// lease runs out, so nothing it does lands after another holder may
    /// have taken over.
    pub async fn run_locked<T, E, F, Fut>(&self, cust_id: &CustomerId, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.locked(cust_id, None, None).await?;
        let outcome = tokio::time::timeout_at(guard.expires_at(), f()).await;
        if let Err(e) = guard.release().await {
            warn!(cust_id = %cust_id, error = %e, "customer lock release failed; lease will lapse");
        }
        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(cust_id = %cust_id, "customer lock lease expired before work finished");
                Err(LockError::LeaseExpired {
                    cust_id: cust_id.clone(),
                }
                .into())
            }
        }
    }

    /// Release the lock for `cust_id` whoever holds it. A no-op when it is
    /// not held.
    pub async fn release(&self, cust_id: &CustomerId) -> Result<bool, LockError> {
        self.service.force_release(&self.key(cust_id)).await
    }

    pub async fn is_locked(&self, cust_id: &CustomerId) -> Result<bool, LockError> {
        self.service.is_locked(&self.key(cust_id)).await
    }

    /// Release every customer lock. Admin and test use.
    pub async fn clear_all(&self) -> Result<usize, LockError> {
        let cleared = self.service.clear_prefix(&self.settings.key_prefix).await?;
        if cleared > 0 {
            warn!(cleared, "cleared held customer locks");
        }
        Ok(cleared)
    }
}

/// Proof of holding a customer lock.
///
/// Prefer [`CustomerLockGuard::release`]. Dropping an unreleased guard, for
/// example when the owning task is cancelled, releases the lock from a
/// background task.
pub struct CustomerLockGuard {
    service: Arc<dyn LockService>,
    key: String,
    owner: String,
    cust_id: CustomerId,
    expires_at: Instant,
    released: bool,
}

impl std::fmt::Debug for CustomerLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomerLockGuard")
            .field("cust_id", &self.cust_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl CustomerLockGuard {
    pub fn cust_id(&self) -> &CustomerId {
        &self.cust_id
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Returns whether the lock was still ours to release.
    pub async fn release(mut self) -> Result<bool, LockError> {
        let result = self.service.release(&self.key, &self.owner).await;
        self.released = true;
        if let Ok(true) = result {
            debug!(cust_id = %self.cust_id, "customer lock released");
        }
        result
    }
}

impl Drop for CustomerLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let service = self.service.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        let cust_id = self.cust_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = service.release(&key, &owner).await {
                        warn!(cust_id = %cust_id, error = %e, "background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(cust_id = %cust_id, "guard dropped outside a runtime; lease will lapse");
            }
        }
    }
}
