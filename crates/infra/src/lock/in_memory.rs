use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{LockError, LockService};

#[derive(Debug)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

/// Process-local lock table. Leases run on the tokio clock, so paused-time
/// tests can expire them.
#[derive(Debug, Default)]
pub struct InMemoryLockService {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn leases(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Lease>>, LockError> {
        self.leases
            .lock()
            .map_err(|_| LockError::Backend("lock table poisoned".to_string()))
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut leases = self.leases()?;
        if leases.get(key).is_some_and(|l| l.expires_at > now) {
            return Ok(false);
        }
        leases.insert(
            key.to_string(),
            Lease {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockError> {
        let mut leases = self.leases()?;
        if leases.get(key).is_some_and(|l| l.owner == owner) {
            leases.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn force_release(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.leases()?.remove(key).is_some())
    }

    async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        Ok(self.leases()?.get(key).is_some_and(|l| l.expires_at > now))
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<usize, LockError> {
        let now = Instant::now();
        let mut leases = self.leases()?;
        let mut cleared = 0;
        leases.retain(|key, lease| {
            if key.starts_with(prefix) {
                if lease.expires_at > now {
                    cleared += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn lease_expires_after_ttl() {
        let locks = InMemoryLockService::new();
        assert!(locks.try_acquire("k", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!locks.try_acquire("k", "b", Duration::from_secs(5)).await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!locks.is_locked("k").await.unwrap());
        assert!(locks.try_acquire("k", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn only_owner_releases() {
        let locks = InMemoryLockService::new();
        locks.try_acquire("k", "a", Duration::from_secs(5)).await.unwrap();
        assert!(!locks.release("k", "b").await.unwrap());
        assert!(locks.is_locked("k").await.unwrap());
        assert!(locks.release("k", "a").await.unwrap());
        assert!(!locks.is_locked("k").await.unwrap());
    }

    #[tokio::test]
    async fn clear_prefix_leaves_other_keys() {
        let locks = InMemoryLockService::new();
        let ttl = Duration::from_secs(5);
        locks.try_acquire("p:a", "x", ttl).await.unwrap();
        locks.try_acquire("p:b", "x", ttl).await.unwrap();
        locks.try_acquire("q:a", "x", ttl).await.unwrap();
        assert_eq!(locks.clear_prefix("p:").await.unwrap(), 2);
        assert!(locks.is_locked("q:a").await.unwrap());
    }
}
