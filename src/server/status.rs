//! Feed health report.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::approver::ActionService;
use crate::hub::{FeedSource, SourceStats};
use crate::types::ConnectionState;

/// Body of `GET /healthcheck/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub websocket: WebsocketStatus,
}

/// Upstream feed state as seen by this agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsocketStatus {
    pub ready_state: ConnectionState,
    pub remote_feed_url: String,
    /// External feed clients only; the auto-approver is not counted.
    pub connected_clients: usize,
}

impl WebsocketStatus {
    pub fn collect<S: SourceStats>(source: &S, connected_clients: usize) -> Self {
        WebsocketStatus {
            ready_state: source.ready_state(),
            remote_feed_url: source.feed_url().to_string(),
            connected_clients,
        }
    }
}

pub async fn status_handler<S: FeedSource, M: ActionService>(
    State(state): State<AppState<S, M>>,
) -> Json<StatusResponse> {
    let hub = state.hub();
    Json(StatusResponse {
        websocket: WebsocketStatus::collect(hub.source().as_ref(), hub.external_feed_clients()),
    })
}
