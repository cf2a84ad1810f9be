//! In-process cache and lock table.
//!
//! Clones share one table, so several coordinators built over clones of the
//! same backend behave like processes sharing one Redis. Expiry uses the
//! tokio clock and therefore follows a paused test clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backend::{BackendError, DistributedLock, LockHandle, SharedCache};

/// Default lease of an acquired lock.
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(8);

#[derive(Default)]
struct Tables {
    cache: HashMap<String, (String, Instant)>,
    locks: HashMap<String, (u64, Instant)>,
    next_owner: u64,
}

/// Shared in-memory backend implementing both capabilities.
#[derive(Clone)]
pub struct InMemoryBackend {
    tables: Arc<Mutex<Tables>>,
    lease: Duration,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_LEASE)
    }
}

impl InMemoryBackend {
    /// Creates an empty backend whose locks expire after `lease`.
    pub fn new(lease: Duration) -> Self {
        InMemoryBackend {
            tables: Arc::new(Mutex::new(Tables::default())),
            lease,
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SharedCache for InMemoryBackend {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<String>, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let now = Instant::now();
        let mut tables = self.tables();
        let live = tables
            .cache
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(value, _)| value.clone());
        if live.is_none() {
            tables.cache.remove(key);
        }
        Ok(live)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        self.tables()
            .cache
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

/// Handle to a named lock in an [`InMemoryBackend`].
pub struct MemoryMutex {
    name: String,
    owner: Option<u64>,
    backend: InMemoryBackend,
}

impl DistributedLock for InMemoryBackend {
    type Mutex = MemoryMutex;

    fn new_mutex(&self, name: &str) -> MemoryMutex {
        MemoryMutex {
            name: name.to_string(),
            owner: None,
            backend: self.clone(),
        }
    }
}

impl LockHandle for MemoryMutex {
    async fn lock(&mut self, cancel: &CancellationToken) -> Result<(), BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let now = Instant::now();
        let mut tables = self.backend.tables();

        if let Some((_, expires)) = tables.locks.get(&self.name)
            && *expires > now
        {
            return Err(BackendError::LockTaken(self.name.clone()));
        }

        tables.next_owner += 1;
        let owner = tables.next_owner;
        tables
            .locks
            .insert(self.name.clone(), (owner, now + self.backend.lease));
        self.owner = Some(owner);
        Ok(())
    }

    async fn unlock(&mut self, cancel: &CancellationToken) -> Result<bool, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let Some(owner) = self.owner.take() else {
            return Ok(false);
        };

        let now = Instant::now();
        let mut tables = self.backend.tables();
        let held = tables
            .locks
            .get(&self.name)
            .is_some_and(|(holder, expires)| *holder == owner && *expires > now);
        if held {
            tables.locks.remove(&self.name);
        }
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    // ─── Cache ───

    #[tokio::test(start_paused = true)]
    async fn cache_entry_expires_after_ttl() {
        let backend = InMemoryBackend::default();
        backend.set("A1", "1", Duration::from_secs(6), &token()).await.unwrap();

        assert_eq!(backend.get("A1", &token()).await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(backend.get("A1", &token()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clones_share_the_cache() {
        let a = InMemoryBackend::default();
        let b = a.clone();

        a.set("k", "v", Duration::from_secs(60), &token()).await.unwrap();

        assert_eq!(b.get("k", &token()).await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn cancelled_calls_fail() {
        let backend = InMemoryBackend::default();
        let cancel = token();
        cancel.cancel();

        assert!(matches!(backend.get("k", &cancel).await, Err(BackendError::Cancelled)));
        let mut mutex = backend.new_mutex("k");
        assert!(matches!(mutex.lock(&cancel).await, Err(BackendError::Cancelled)));
    }

    // ─── Locks ───

    #[tokio::test]
    async fn second_handle_cannot_lock_until_released() {
        let backend = InMemoryBackend::default();
        let mut first = backend.new_mutex("A1");
        let mut second = backend.clone().new_mutex("A1");

        first.lock(&token()).await.unwrap();
        assert!(matches!(
            second.lock(&token()).await,
            Err(BackendError::LockTaken(name)) if name == "A1"
        ));

        assert!(first.unlock(&token()).await.unwrap());
        second.lock(&token()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_frees_the_lock() {
        let backend = InMemoryBackend::new(Duration::from_secs(8));
        let mut first = backend.new_mutex("A1");
        let mut second = backend.new_mutex("A1");

        first.lock(&token()).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        second.lock(&token()).await.unwrap();
        assert!(!first.unlock(&token()).await.unwrap());
        assert!(second.unlock(&token()).await.unwrap());
    }

    #[tokio::test]
    async fn unlock_without_lock_reports_not_held() {
        let backend = InMemoryBackend::default();
        let mut mutex = backend.new_mutex("A1");

        assert!(!mutex.unlock(&token()).await.unwrap());
    }

    #[tokio::test]
    async fn locks_are_per_name() {
        let backend = InMemoryBackend::default();
        let mut a = backend.new_mutex("A1");
        let mut b = backend.new_mutex("A2");

        a.lock(&token()).await.unwrap();
        b.lock(&token()).await.unwrap();
    }
}
