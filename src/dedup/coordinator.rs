//! Cross-process "claim this action" protocol.
//!
//! ```text
//! should_handle(id) ── cache hit ──► None (already finalized elsewhere)
//!        │
//!        └─ miss ──► Some(claim) ── acquire_lock ── err ──► sleep delay, abandon
//!                                        │
//!                                        ok ──► approve ──► release(claim)
//!                                                            ├─ unlock
//!                                                            └─ cache.set(id, ttl)  (always)
//! ```
//!
//! The cache marker is written even when unlocking fails, so the action is
//! not reprocessed by any process within the TTL window.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backend::{BackendError, DistributedLock, LockHandle, SharedCache};
use crate::types::ActionId;

/// Value stored under a finalized action id. Only its presence matters.
const HANDLED_MARKER: &str = "1";

/// Errors from the dedup protocol.
#[derive(Debug, Error)]
pub enum DedupError {
    /// Cache or lock backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The lock had already been lost when it was released.
    #[error("lock for action {0} was no longer held")]
    LockNotHeld(ActionId),
}

/// Timing knobs of the dedup protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupConfig {
    /// Pause after a failed lock acquisition before reporting the failure.
    pub lock_error_delay: Duration,

    /// Lifetime of the "already handled" cache marker.
    pub action_ttl: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            lock_error_delay: Duration::from_millis(300),
            action_ttl: Duration::from_secs(6),
        }
    }
}

/// A claim on one action id, holding its (not yet acquired) mutex handle.
///
/// At most one claim per action id exists per coordinator; dropping the
/// claim frees the id for a new claim.
pub struct ActionClaim<M> {
    action_id: ActionId,
    mutex: M,
    _in_flight: InFlightGuard,
}

impl<M> ActionClaim<M> {
    pub fn action_id(&self) -> &ActionId {
        &self.action_id
    }
}

struct InFlightGuard {
    action_id: ActionId,
    set: Arc<Mutex<HashSet<ActionId>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.action_id);
    }
}

/// Decides whether this process should handle an action.
pub struct ActionDedupCoordinator<C, L> {
    cache: C,
    locks: L,
    config: DedupConfig,
    in_flight: Arc<Mutex<HashSet<ActionId>>>,
}

impl<C: SharedCache, L: DistributedLock> ActionDedupCoordinator<C, L> {
    pub fn new(cache: C, locks: L, config: DedupConfig) -> Self {
        ActionDedupCoordinator {
            cache,
            locks,
            config,
            in_flight: Arc::default(),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Returns a claim unless the action was already finalized.
    ///
    /// A cache hit means some process finished the action; the lock is not
    /// touched. A cache error is treated as a miss. `None` is also returned
    /// while this coordinator already holds a claim for the same id.
    pub async fn should_handle(
        &self,
        action_id: &ActionId,
        cancel: &CancellationToken,
    ) -> Option<ActionClaim<L::Mutex>> {
        match self.cache.get(action_id.as_str(), cancel).await {
            Ok(Some(_)) => {
                debug!(action_id = %action_id, "Action was already handled");
                return None;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(action_id = %action_id, error = %e, "Cache lookup failed, treating as unhandled");
            }
        }

        let newly_claimed = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action_id.clone());
        if !newly_claimed {
            debug!(action_id = %action_id, "Action is already being handled locally");
            return None;
        }

        Some(ActionClaim {
            action_id: action_id.clone(),
            mutex: self.locks.new_mutex(action_id.as_str()),
            _in_flight: InFlightGuard {
                action_id: action_id.clone(),
                set: Arc::clone(&self.in_flight),
            },
        })
    }

    /// Acquires the claim's mutex.
    ///
    /// On failure, waits `lock_error_delay` before returning the error so
    /// the holder has time to finish and write the cache marker.
    pub async fn acquire_lock(
        &self,
        claim: &mut ActionClaim<L::Mutex>,
        cancel: &CancellationToken,
    ) -> Result<(), DedupError> {
        if let Err(e) = claim.mutex.lock(cancel).await {
            tokio::time::sleep(self.config.lock_error_delay).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Unlocks the claim's mutex, then marks the action handled.
    ///
    /// The marker is written whatever the unlock outcome. An unlock failure
    /// takes precedence over a cache write failure in the returned error.
    pub async fn release(
        &self,
        mut claim: ActionClaim<L::Mutex>,
        cancel: &CancellationToken,
    ) -> Result<(), DedupError> {
        let unlocked = match claim.mutex.unlock(cancel).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DedupError::LockNotHeld(claim.action_id.clone())),
            Err(e) => Err(DedupError::Backend(e)),
        };

        let marked = self
            .cache
            .set(
                claim.action_id.as_str(),
                HANDLED_MARKER,
                self.config.action_ttl,
                cancel,
            )
            .await;
        if let Err(e) = &marked {
            warn!(action_id = %claim.action_id, error = %e, "Failed to mark action handled");
        }

        unlocked?;
        marked?;
        Ok(())
    }
}
