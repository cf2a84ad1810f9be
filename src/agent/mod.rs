//! Collaborators the agent core delegates to.
//!
//! The core never signs or talks REST itself. It needs exactly two things:
//!
//! - an [`AgentSigner`] that signs approval digests and mints a short-lived
//!   auth token for every upstream connection attempt;
//! - an [`ActionClient`] that approves or rejects an action by id.
//!
//! Both are traits so the feed source, auto-approver and action manager can
//! be driven by fakes in tests.

use std::future::Future;
use std::sync::Arc;

use crate::types::ActionId;

pub mod custody;
pub mod signer;

pub use custody::{CustodyClient, CustodyError};
pub use signer::{HmacSigner, SignerError};

/// Signs on behalf of the registered agent.
pub trait AgentSigner: Send + Sync + 'static {
    /// The error type returned by this signer.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Signs each message hash of an action, in order.
    fn sign_approval_digest(
        &self,
        action_id: &ActionId,
        message_hashes: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, Self::Error>;

    /// Produces a fresh one-time token for authenticating a request or dial.
    fn connection_auth_token(&self) -> Result<Vec<u8>, Self::Error>;
}

/// Approves or rejects actions against the custody backend.
///
/// Calls are treated as idempotent; an "already approved" answer is just
/// another result.
pub trait ActionClient: Send + Sync + 'static {
    /// The error type returned by this client.
    type Error: std::error::Error + Send + Sync + 'static;

    fn approve(&self, action_id: &ActionId) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn reject(&self, action_id: &ActionId) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<T: AgentSigner> AgentSigner for Arc<T> {
    type Error = T::Error;

    fn sign_approval_digest(
        &self,
        action_id: &ActionId,
        message_hashes: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, Self::Error> {
        (**self).sign_approval_digest(action_id, message_hashes)
    }

    fn connection_auth_token(&self) -> Result<Vec<u8>, Self::Error> {
        (**self).connection_auth_token()
    }
}
