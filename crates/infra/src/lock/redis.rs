//! Redis lock backend.
//!
//! `SET key owner NX PX ttl` to acquire, a compare-and-delete script to
//! release, `SCAN` + `DEL` to clear a prefix. Works against a single Redis
//! primary; leases expire server-side, so a crashed holder frees its key.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::instrument;

use super::{LockError, LockService};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const SCAN_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisLockService {
    conn: ConnectionManager,
    release: redis::Script,
}

impl std::fmt::Debug for RedisLockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockService").finish_non_exhaustive()
    }
}

impl RedisLockService {
    pub async fn connect(redis_url: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url).map_err(backend)?;
        let conn = ConnectionManager::new(client).await.map_err(backend)?;
        Ok(Self {
            conn,
            release: redis::Script::new(RELEASE_SCRIPT),
        })
    }
}

fn backend(err: redis::RedisError) -> LockError {
    LockError::Backend(err.to_string())
}

#[async_trait]
impl LockService for RedisLockService {
    #[instrument(skip(self, owner), err)]
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let ttl_ms = super::millis(ttl).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(deleted > 0)
    }

    async fn force_release(&self, key: &str) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(key).await.map_err(backend)?;
        Ok(deleted > 0)
    }

    async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(backend)
    }

    #[instrument(skip(self), err)]
    async fn clear_prefix(&self, prefix: &str) -> Result<usize, LockError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut cleared = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await.map_err(backend)?;
                cleared += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(cleared)
    }
}
