//! HMAC-SHA256 agent signer.
//!
//! The custody backend and the agent share a secret established at
//! registration. Approval signatures and connection tokens are both keyed
//! HMACs over that secret:
//!
//! - token: `timestamp (u64, big endian) || HMAC(agent_id || timestamp)`
//! - signature of a message hash: `HMAC(action_id || hash)`

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::AgentSigner;
use crate::types::{ActionId, AgentId};

type HmacSha256 = Hmac<Sha256>;

/// Errors from the HMAC signer.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The configured secret is empty.
    #[error("agent secret must not be empty")]
    EmptySecret,

    /// The key was rejected by the MAC implementation.
    #[error("invalid signing key")]
    InvalidKey,

    /// There was nothing to sign.
    #[error("no message hashes to sign for action {0}")]
    NoMessages(ActionId),

    /// The system clock is before the unix epoch.
    #[error("system clock is before the unix epoch")]
    Clock,
}

/// Signs with HMAC-SHA256 keyed by the agent secret.
#[derive(Clone)]
pub struct HmacSigner {
    agent_id: AgentId,
    secret: Vec<u8>,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}

impl HmacSigner {
    /// Creates a signer for `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::EmptySecret`] if `secret` is empty.
    pub fn new(agent_id: AgentId, secret: impl Into<Vec<u8>>) -> Result<Self, SignerError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SignerError::EmptySecret);
        }
        Ok(HmacSigner { agent_id, secret })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    fn mac(&self, parts: &[&[u8]]) -> Result<Vec<u8>, SignerError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| SignerError::InvalidKey)?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Builds a token for the given unix timestamp.
    fn token_at(&self, timestamp: u64) -> Result<Vec<u8>, SignerError> {
        let ts = timestamp.to_be_bytes();
        let tag = self.mac(&[self.agent_id.as_str().as_bytes(), &ts])?;

        let mut token = Vec::with_capacity(ts.len() + tag.len());
        token.extend_from_slice(&ts);
        token.extend_from_slice(&tag);
        Ok(token)
    }
}

impl AgentSigner for HmacSigner {
    type Error = SignerError;

    fn sign_approval_digest(
        &self,
        action_id: &ActionId,
        message_hashes: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, SignerError> {
        if message_hashes.is_empty() {
            return Err(SignerError::NoMessages(action_id.clone()));
        }
        message_hashes
            .iter()
            .map(|hash| self.mac(&[action_id.as_str().as_bytes(), hash]))
            .collect()
    }

    fn connection_auth_token(&self) -> Result<Vec<u8>, SignerError> {
        let now = u64::try_from(Utc::now().timestamp()).map_err(|_| SignerError::Clock)?;
        self.token_at(now)
    }
}
