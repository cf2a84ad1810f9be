//! Manual approve/reject endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use super::AppState;
use crate::approver::{ActionError, ActionService};
use crate::hub::FeedSource;
use crate::types::ActionId;

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let status = match &self {
            ActionError::Lock { .. } => StatusCode::CONFLICT,
            ActionError::Client { .. } => StatusCode::BAD_GATEWAY,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Approves one action.
///
/// # Example
///
/// ```ignore
/// PUT /client/action/0b9f3c1e HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {}
/// ```
pub async fn approve_handler<S: FeedSource, M: ActionService>(
    State(state): State<AppState<S, M>>,
    Path(action_id): Path<String>,
) -> Result<Json<Value>, ActionError> {
    state.actions().approve(&ActionId::new(action_id)).await?;
    Ok(Json(json!({})))
}

/// Rejects one action. Same response shape as [`approve_handler`].
pub async fn reject_handler<S: FeedSource, M: ActionService>(
    State(state): State<AppState<S, M>>,
    Path(action_id): Path<String>,
) -> Result<Json<Value>, ActionError> {
    state.actions().reject(&ActionId::new(action_id)).await?;
    Ok(Json(json!({})))
}
