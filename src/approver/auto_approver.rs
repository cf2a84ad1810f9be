//! Automatic approval of actions arriving on the feed.
//!
//! The auto-approver is the hub's internal client. For every payload it:
//!
//! 1. decodes an [`ActionInfo`] (failures are recorded as the last error);
//! 2. drops expired actions;
//! 3. with load balancing enabled, asks the dedup coordinator for a claim;
//! 4. handles the action on its own task: lock, approve with linear
//!    backoff, release.
//!
//! Failures inside a handling task are logged; nothing waits on them.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::retry::{RetryConfig, RetryTimer};
use crate::agent::ActionClient;
use crate::dedup::{ActionClaim, ActionDedupCoordinator, DedupError, DistributedLock, SharedCache};
use crate::hub::{FeedHub, FeedReceiver, FeedSource};
use crate::types::{ActionId, ActionInfo};

/// Errors from handling a single action occurrence.
#[derive(Debug, Error)]
pub enum ApproveError {
    /// The distributed lock could not be acquired; a sibling likely has it.
    #[error("failed to acquire lock for action {action_id}: {source}")]
    Lock {
        action_id: ActionId,
        #[source]
        source: DedupError,
    },

    /// The approval call kept failing until the retry window closed.
    #[error("approval of action {action_id} timed out after {attempts} attempts: {last_error}")]
    TimedOut {
        action_id: ActionId,
        attempts: u32,
        last_error: String,
    },
}

/// Consumes the hub's internal feed and approves eligible actions.
pub struct AutoApprover<A, C, L> {
    inner: Arc<Inner<A, C, L>>,
}

struct Inner<A, C, L> {
    client: Arc<A>,
    dedup: Option<Arc<ActionDedupCoordinator<C, L>>>,
    retry: RetryConfig,
    last_error: Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl<A, C, L> Clone for AutoApprover<A, C, L> {
    fn clone(&self) -> Self {
        AutoApprover {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, C, L> AutoApprover<A, C, L>
where
    A: ActionClient,
    C: SharedCache,
    L: DistributedLock,
{
    /// Creates an auto-approver.
    ///
    /// # Arguments
    ///
    /// * `client` - Collaborator that performs the approval call
    /// * `dedup` - Coordinator shared with sibling agents; `None` disables
    ///   load balancing and every eligible action is handled
    /// * `retry` - Linear backoff policy for the approval call
    pub fn new(
        client: Arc<A>,
        dedup: Option<Arc<ActionDedupCoordinator<C, L>>>,
        retry: RetryConfig,
    ) -> Self {
        AutoApprover {
            inner: Arc::new(Inner {
                client,
                dedup,
                retry,
                last_error: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Token passed to every cache/lock call; cancelling it aborts them.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// The most recent payload decode error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers an internal client with `hub` and listens on it.
    pub fn attach<S: FeedSource>(&self, hub: &FeedHub<S>) -> JoinHandle<()> {
        let feed = hub.subscribe(true);
        tokio::spawn(self.clone().listen(feed))
    }

    /// Handles payloads until the hub closes the feed.
    pub async fn listen(self, mut feed: FeedReceiver) {
        while let Some(payload) = feed.recv().await {
            self.handle_message(&payload).await;
        }
        info!(client = %feed.id(), "Auto approval stopped");
    }

    async fn handle_message(&self, payload: &[u8]) {
        let action = match ActionInfo::from_payload(payload) {
            Ok(action) => action,
            Err(e) => {
                error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Failed to decode feed message"
                );
                *self
                    .inner
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                return;
            }
        };

        if !action.is_not_expired() {
            info!(action_id = %action.id, "Action has expired");
            return;
        }

        let claim = match &self.inner.dedup {
            Some(dedup) => match dedup.should_handle(&action.id, &self.inner.cancel).await {
                Some(claim) => Some(claim),
                None => return,
            },
            None => None,
        };

        let approver = self.clone();
        tokio::spawn(async move {
            let action_id = action.id.clone();
            if let Err(e) = approver.handle_action(action, claim).await {
                error!(action_id = %action_id, error = %e, "Auto approval failed");
            }
        });
    }

    #[instrument(skip(self, action, claim), fields(action_id = %action.id, agent_id = %action.agent_id))]
    async fn handle_action(
        &self,
        action: ActionInfo,
        claim: Option<ActionClaim<L::Mutex>>,
    ) -> Result<(), ApproveError> {
        let (Some(dedup), Some(mut claim)) = (&self.inner.dedup, claim) else {
            return self.approve(&action.id).await;
        };

        dedup
            .acquire_lock(&mut claim, &self.inner.cancel)
            .await
            .map_err(|source| ApproveError::Lock {
                action_id: action.id.clone(),
                source,
            })?;

        let result = self.approve(&action.id).await;

        if let Err(e) = dedup.release(claim, &self.inner.cancel).await {
            error!(error = %e, "Failed to release action");
        }
        result
    }

    /// Calls the approval collaborator until it succeeds or the retry
    /// window closes.
    pub async fn approve(&self, action_id: &ActionId) -> Result<(), ApproveError> {
        let mut timer = RetryTimer::new(self.inner.retry);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.inner.client.approve(action_id).await {
                Ok(()) => {
                    info!(action_id = %action_id, attempts, "Action approved automatically");
                    return Ok(());
                }
                Err(e) => {
                    error!(action_id = %action_id, error = %e, "Approval failed");

                    if timer.is_timed_out() {
                        warn!(action_id = %action_id, attempts, "Auto approval gave up");
                        return Err(ApproveError::TimedOut {
                            action_id: action_id.clone(),
                            attempts,
                            last_error: e.to_string(),
                        });
                    }

                    warn!(
                        action_id = %action_id,
                        retry_in = ?timer.current_interval(),
                        "Auto approval will be repeated"
                    );
                    timer.retry().await;
                }
            }
        }
    }
}
