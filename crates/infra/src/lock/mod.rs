//! Per-customer mutual exclusion.
//!
//! [`LockService`] is the backend seam (in-process or Redis); [`CustomerLock`]
//! layers leases, blocking acquisition and guard-based release on top.

pub mod customer;
pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use keepsats_core::CustomerId;

pub use customer::{CustomerLock, CustomerLockGuard};
pub use in_memory::InMemoryLockService;
#[cfg(feature = "redis")]
pub use self::redis::RedisLockService;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LockError {
    #[error("customer lock busy: {cust_id} (waited {waited_ms} ms)")]
    CustomerLockBusy { cust_id: CustomerId, waited_ms: u64 },
    #[error("lock lease expired for {cust_id}")]
    LeaseExpired { cust_id: CustomerId },
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Lease-based lock backend. Keys are opaque strings; `owner` is a token
/// unique per acquisition so that only the holder can release.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take `key` for `ttl` if it is free or its lease has lapsed.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Release `key` if `owner` still holds it. Returns whether it did.
    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockError>;

    /// Release `key` whoever holds it.
    async fn force_release(&self, key: &str) -> Result<bool, LockError>;

    async fn is_locked(&self, key: &str) -> Result<bool, LockError>;

    /// Release every key under `prefix`; returns how many were held.
    async fn clear_prefix(&self, prefix: &str) -> Result<usize, LockError>;
}

#[async_trait]
impl<S> LockService for Arc<S>
where
    S: LockService + ?Sized,
{
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        (**self).try_acquire(key, owner, ttl).await
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockError> {
        (**self).release(key, owner).await
    }

    async fn force_release(&self, key: &str) -> Result<bool, LockError> {
        (**self).force_release(key).await
    }

    async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        (**self).is_locked(key).await
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<usize, LockError> {
        (**self).clear_prefix(prefix).await
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
