//! Redis-backed cache and distributed mutex.
//!
//! - cache: `GET key` / `SET key value PX ttl`
//! - lock: `SET name <owner> NX PX lease`, retried a bounded number of times
//! - unlock: compare-and-delete script, so only the owner can release

use std::time::Duration;

use redis::Script;
use redis::aio::MultiplexedConnection;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::backend::{BackendError, DistributedLock, LockHandle, SharedCache, cancellable};

/// Deletes the key only if it still holds our owner token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock acquisition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedisLockConfig {
    /// How long an acquired lock lives without being released.
    pub lease: Duration,

    /// `SET NX` attempts before giving up.
    pub tries: u32,

    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for RedisLockConfig {
    fn default() -> Self {
        RedisLockConfig {
            lease: Duration::from_secs(8),
            tries: 32,
            retry_delay: Duration::from_millis(150),
        }
    }
}

/// Cache and lock backend over one multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
    config: RedisLockConfig,
}

impl RedisBackend {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str, config: RedisLockConfig) -> Result<Self, BackendError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(RedisBackend { conn, config })
    }
}

impl SharedCache for RedisBackend {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<String>, BackendError> {
        let mut conn = self.conn.clone();
        cancellable(cancel, async move {
            let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        cancellable(cancel, async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }
}

/// Handle to one named Redis lock.
pub struct RedisMutex {
    name: String,
    owner: String,
    conn: MultiplexedConnection,
    config: RedisLockConfig,
}

impl DistributedLock for RedisBackend {
    type Mutex = RedisMutex;

    fn new_mutex(&self, name: &str) -> RedisMutex {
        RedisMutex {
            name: name.to_string(),
            owner: Uuid::new_v4().to_string(),
            conn: self.conn.clone(),
            config: self.config,
        }
    }
}

impl RedisMutex {
    async fn try_acquire(&mut self) -> Result<bool, BackendError> {
        let lease_ms = u64::try_from(self.config.lease.as_millis()).unwrap_or(u64::MAX);
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.name)
            .arg(&self.owner)
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut self.conn)
            .await?;
        Ok(reply.is_some())
    }
}

impl LockHandle for RedisMutex {
    async fn lock(&mut self, cancel: &CancellationToken) -> Result<(), BackendError> {
        let tries = self.config.tries.max(1);
        let retry_delay = self.config.retry_delay;

        for attempt in 1..=tries {
            if cancellable(cancel, self.try_acquire()).await? {
                return Ok(());
            }
            debug!(lock = %self.name, attempt, "Lock busy");
            if attempt < tries {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }

        Err(BackendError::LockTaken(self.name.clone()))
    }

    async fn unlock(&mut self, cancel: &CancellationToken) -> Result<bool, BackendError> {
        let script = Script::new(UNLOCK_SCRIPT);
        let name = self.name.clone();
        let owner = self.owner.clone();
        let mut conn = self.conn.clone();

        cancellable(cancel, async move {
            let deleted: i64 = script.key(name).arg(owner).invoke_async(&mut conn).await?;
            Ok(deleted == 1)
        })
        .await
    }
}
