//! Capability traits for the shared cache and distributed mutex.
//!
//! Every call takes an explicit [`CancellationToken`]; a cancelled token
//! aborts the call with [`BackendError::Cancelled`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from a cache or lock backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Redis command failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The named lock is held by another owner.
    #[error("lock {0} is held by another owner")]
    LockTaken(String),

    /// The caller's cancellation token fired.
    #[error("backend operation cancelled")]
    Cancelled,
}

/// Key/value store with per-entry expiry, shared between agent processes.
pub trait SharedCache: Send + Sync + 'static {
    /// Returns the value under `key`, or `None` if absent or expired.
    fn get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<String>, BackendError>> + Send;

    /// Stores `value` under `key` for `ttl`.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Factory for named mutexes shared between agent processes.
pub trait DistributedLock: Send + Sync + 'static {
    /// The handle type produced by this backend.
    type Mutex: LockHandle;

    /// Creates a handle for the mutex `name`. Nothing is acquired yet.
    fn new_mutex(&self, name: &str) -> Self::Mutex;
}

/// A handle to one named distributed mutex.
pub trait LockHandle: Send + 'static {
    /// Acquires the mutex.
    fn lock(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Releases the mutex.
    ///
    /// Returns `false` if this handle no longer held it (lease expired or
    /// never acquired).
    fn unlock(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<bool, BackendError>> + Send;
}

/// Runs `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BackendError::Cancelled),
        result = fut => result,
    }
}
