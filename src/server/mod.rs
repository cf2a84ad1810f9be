//! Local HTTP server of the signing agent.
//!
//! This module implements the HTTP server that:
//! - Reports the upstream feed's health for monitoring
//! - Re-publishes the feed to local websocket consumers
//! - Approves or rejects single actions on request
//! - Provides health checks for liveness probes
//!
//! # Endpoints
//!
//! - `GET /healthcheck/status` - Upstream feed state and connected clients
//! - `GET /client/feed` - Websocket stream of feed payloads
//! - `PUT /client/action/{action_id}` - Approve an action
//! - `DELETE /client/action/{action_id}` - Reject an action
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;
use std::time::Duration;

use crate::approver::ActionService;
use crate::hub::{FeedHub, FeedSource};

pub mod action;
pub mod feed;
pub mod health;
pub mod status;

pub use action::{approve_handler, reject_handler};
pub use feed::client_feed_handler;
pub use health::health_handler;
pub use status::{StatusResponse, WebsocketStatus, status_handler};

/// Timing of the websocket connections served to local consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedClientConfig {
    /// Interval between keep-alive pings.
    pub ping_period: Duration,

    /// Deadline for writing one frame.
    pub write_wait: Duration,
}

impl Default for FeedClientConfig {
    fn default() -> Self {
        FeedClientConfig {
            ping_period: Duration::from_secs(5),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<S, M> {
    inner: Arc<AppStateInner<S, M>>,
}

struct AppStateInner<S, M> {
    /// Hub that local feed clients are registered with.
    hub: FeedHub<S>,

    /// Backend of the action endpoints.
    actions: M,

    feed: FeedClientConfig,
}

impl<S, M> Clone for AppState<S, M> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: FeedSource, M: ActionService> AppState<S, M> {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `hub` - The running feed hub
    /// * `actions` - Service behind the approve/reject endpoints
    /// * `feed` - Ping and write timing for websocket consumers
    pub fn new(hub: FeedHub<S>, actions: M, feed: FeedClientConfig) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { hub, actions, feed }),
        }
    }

    /// Returns the feed hub.
    pub fn hub(&self) -> &FeedHub<S> {
        &self.inner.hub
    }

    /// Returns the action service.
    pub fn actions(&self) -> &M {
        &self.inner.actions
    }

    /// Returns the websocket client timing.
    pub fn feed_config(&self) -> FeedClientConfig {
        self.inner.feed
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<S: FeedSource, M: ActionService>(app_state: AppState<S, M>) -> axum::Router {
    use axum::routing::{get, put};

    axum::Router::new()
        .route("/healthcheck/status", get(status_handler::<S, M>))
        .route("/client/feed", get(client_feed_handler::<S, M>))
        .route(
            "/client/action/{action_id}",
            put(approve_handler::<S, M>).delete(reject_handler::<S, M>),
        )
        .route("/health", get(health_handler))
        .with_state(app_state)
}
