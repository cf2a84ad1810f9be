//! Manual approve/reject of a single action.
//!
//! Used by the local REST surface. With load balancing enabled, manual
//! approval takes part in the same dedup protocol as the auto-approver so
//! an operator and a sibling agent cannot both approve an action.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::agent::ActionClient;
use crate::dedup::{ActionDedupCoordinator, DedupError, DistributedLock, SharedCache};
use crate::types::ActionId;

/// Errors from a manual action request.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action's distributed lock is held elsewhere.
    #[error("failed to acquire lock for action {action_id}: {source}")]
    Lock {
        action_id: ActionId,
        #[source]
        source: DedupError,
    },

    /// The custody collaborator rejected or failed the call.
    #[error("action {action_id} failed: {source}")]
    Client {
        action_id: ActionId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Approves and rejects actions on request.
pub trait ActionService: Send + Sync + 'static {
    fn approve(&self, action_id: &ActionId) -> impl Future<Output = Result<(), ActionError>> + Send;

    fn reject(&self, action_id: &ActionId) -> impl Future<Output = Result<(), ActionError>> + Send;
}

/// [`ActionService`] backed by an [`ActionClient`] and, optionally, the
/// dedup coordinator.
pub struct ActionManager<A, C, L> {
    client: Arc<A>,
    dedup: Option<Arc<ActionDedupCoordinator<C, L>>>,
    cancel: CancellationToken,
}

impl<A, C, L> ActionManager<A, C, L>
where
    A: ActionClient,
    C: SharedCache,
    L: DistributedLock,
{
    pub fn new(client: Arc<A>, dedup: Option<Arc<ActionDedupCoordinator<C, L>>>) -> Self {
        ActionManager {
            client,
            dedup,
            cancel: CancellationToken::new(),
        }
    }

    async fn call_approve(&self, action_id: &ActionId) -> Result<(), ActionError> {
        self.client
            .approve(action_id)
            .await
            .map_err(|e| ActionError::Client {
                action_id: action_id.clone(),
                source: Box::new(e),
            })
    }
}

impl<A, C, L> ActionService for ActionManager<A, C, L>
where
    A: ActionClient,
    C: SharedCache,
    L: DistributedLock,
{
    #[instrument(skip(self), fields(action_id = %action_id))]
    async fn approve(&self, action_id: &ActionId) -> Result<(), ActionError> {
        let Some(dedup) = &self.dedup else {
            return self.call_approve(action_id).await;
        };

        let Some(mut claim) = dedup.should_handle(action_id, &self.cancel).await else {
            debug!("Action was already approved");
            return Ok(());
        };

        dedup
            .acquire_lock(&mut claim, &self.cancel)
            .await
            .map_err(|source| ActionError::Lock {
                action_id: action_id.clone(),
                source,
            })?;

        let result = self.call_approve(action_id).await;

        if let Err(e) = dedup.release(claim, &self.cancel).await {
            error!(error = %e, "Failed to release action");
        }
        result
    }

    #[instrument(skip(self), fields(action_id = %action_id))]
    async fn reject(&self, action_id: &ActionId) -> Result<(), ActionError> {
        self.client
            .reject(action_id)
            .await
            .map_err(|e| ActionError::Client {
                action_id: action_id.clone(),
                source: Box::new(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{DedupConfig, InMemoryBackend, LockHandle};
    use crate::test_utils::RecordingActionClient;
    use std::time::Duration;

    type Manager = ActionManager<RecordingActionClient, InMemoryBackend, InMemoryBackend>;

    fn manager(client: &Arc<RecordingActionClient>, backend: Option<&InMemoryBackend>) -> Manager {
        let dedup = backend.map(|b| {
            Arc::new(ActionDedupCoordinator::new(
                b.clone(),
                b.clone(),
                DedupConfig::default(),
            ))
        });
        ActionManager::new(Arc::clone(client), dedup)
    }

    #[tokio::test]
    async fn approve_without_load_balancing_calls_client() {
        let client = Arc::new(RecordingActionClient::default());

        manager(&client, None).approve(&ActionId::new("A1")).await.unwrap();

        assert_eq!(client.approvals(), vec![ActionId::new("A1")]);
    }

    #[tokio::test]
    async fn already_handled_action_succeeds_without_call() {
        let client = Arc::new(RecordingActionClient::default());
        let backend = InMemoryBackend::default();
        backend
            .set("A1", "1", Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();

        manager(&client, Some(&backend))
            .approve(&ActionId::new("A1"))
            .await
            .unwrap();

        assert_eq!(client.approve_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_failure_is_returned() {
        let client = Arc::new(RecordingActionClient::default());
        let backend = InMemoryBackend::default();
        let mut sibling = backend.new_mutex("A1");
        sibling.lock(&CancellationToken::new()).await.unwrap();

        let err = manager(&client, Some(&backend))
            .approve(&ActionId::new("A1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::Lock { .. }));
        assert_eq!(client.approve_calls(), 0);
    }

    #[tokio::test]
    async fn approve_releases_and_marks_handled() {
        let client = Arc::new(RecordingActionClient::default());
        let backend = InMemoryBackend::default();
        let sut = manager(&client, Some(&backend));

        sut.approve(&ActionId::new("A1")).await.unwrap();
        sut.approve(&ActionId::new("A1")).await.unwrap();

        assert_eq!(client.approve_calls(), 1);
        let mut probe = backend.new_mutex("A1");
        probe.lock(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn approve_failure_still_marks_handled() {
        let client = Arc::new(RecordingActionClient::always_failing());
        let backend = InMemoryBackend::default();
        let sut = manager(&client, Some(&backend));

        let err = sut.approve(&ActionId::new("A1")).await.unwrap_err();

        assert!(matches!(err, ActionError::Client { .. }));
        assert!(
            backend
                .get("A1", &CancellationToken::new())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn reject_calls_client_directly() {
        let client = Arc::new(RecordingActionClient::default());
        let backend = InMemoryBackend::default();

        manager(&client, Some(&backend))
            .reject(&ActionId::new("A1"))
            .await
            .unwrap();

        assert_eq!(client.rejections(), vec![ActionId::new("A1")]);
        assert_eq!(
            backend.get("A1", &CancellationToken::new()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn reject_error_is_returned() {
        let client = Arc::new(RecordingActionClient::always_failing());

        let err = manager(&client, None)
            .reject(&ActionId::new("A1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::Client { .. }));
    }
}
