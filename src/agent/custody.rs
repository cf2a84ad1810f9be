//! HTTP client for the custody backend's action endpoints.
//!
//! # Endpoints
//!
//! - `GET {base}/actions/{id}/messages` - hex-encoded message hashes to sign
//! - `PUT {base}/actions/{id}` - submit `{"signatures": [hex, ...]}` (approve)
//! - `DELETE {base}/actions/{id}` - reject
//!
//! Every request carries a fresh auth token, hex-encoded in the
//! [`AUTH_HEADER`] header.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use super::{ActionClient, AgentSigner};
use crate::hub::AUTH_HEADER;
use crate::types::ActionId;

/// Default request timeout for custody calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors from the custody REST client.
#[derive(Debug, Error)]
pub enum CustodyError {
    /// Transport failure or undecodable response.
    #[error("custody request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("custody backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The backend returned no messages for the action.
    #[error("no messages to sign for action {0}")]
    NoMessages(ActionId),

    /// A message was not valid hex.
    #[error("invalid message for action {action_id}: {source}")]
    InvalidMessage {
        action_id: ActionId,
        #[source]
        source: hex::FromHexError,
    },

    /// The signer failed to produce a token or signature.
    #[error("signer error: {0}")]
    Signer(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Deserialize)]
struct ActionMessagesResponse {
    #[serde(default)]
    messages: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ApproveRequest {
    signatures: Vec<String>,
}

/// Approves and rejects actions over the custody REST API.
#[derive(Debug, Clone)]
pub struct CustodyClient<S> {
    http: Client,
    base_url: String,
    signer: S,
}

impl<S: AgentSigner> CustodyClient<S> {
    /// Creates a client for `base_url` signing with `signer`.
    pub fn new(base_url: impl Into<String>, signer: S) -> Result<Self, CustodyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(CustodyClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        })
    }

    fn action_url(&self, action_id: &ActionId) -> String {
        format!("{}/actions/{}", self.base_url, action_id)
    }

    /// Attaches a freshly minted auth token.
    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, CustodyError> {
        let token = self
            .signer
            .connection_auth_token()
            .map_err(|e| CustodyError::Signer(Box::new(e)))?;
        Ok(request.header(AUTH_HEADER, hex::encode(token)))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, CustodyError> {
        let response = self.authorized(request)?.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CustodyError::Status { status, body });
        }
        Ok(response)
    }

    async fn fetch_messages(&self, action_id: &ActionId) -> Result<Vec<Vec<u8>>, CustodyError> {
        let url = format!("{}/messages", self.action_url(action_id));
        let response: ActionMessagesResponse = self.send(self.http.get(url)).await?.json().await?;

        if response.messages.is_empty() {
            return Err(CustodyError::NoMessages(action_id.clone()));
        }

        response
            .messages
            .iter()
            .map(|m| {
                hex::decode(m).map_err(|source| CustodyError::InvalidMessage {
                    action_id: action_id.clone(),
                    source,
                })
            })
            .collect()
    }
}

impl<S: AgentSigner> ActionClient for CustodyClient<S> {
    type Error = CustodyError;

    #[instrument(skip(self), fields(action_id = %action_id))]
    async fn approve(&self, action_id: &ActionId) -> Result<(), CustodyError> {
        let messages = self.fetch_messages(action_id).await?;
        let signatures = self
            .signer
            .sign_approval_digest(action_id, &messages)
            .map_err(|e| CustodyError::Signer(Box::new(e)))?;

        let body = ApproveRequest {
            signatures: signatures.iter().map(hex::encode).collect(),
        };
        self.send(self.http.put(self.action_url(action_id)).json(&body))
            .await?;

        debug!(signatures = body.signatures.len(), "Approval submitted");
        Ok(())
    }

    #[instrument(skip(self), fields(action_id = %action_id))]
    async fn reject(&self, action_id: &ActionId) -> Result<(), CustodyError> {
        self.send(self.http.delete(self.action_url(action_id)))
            .await?;
        debug!("Rejection submitted");
        Ok(())
    }
}
