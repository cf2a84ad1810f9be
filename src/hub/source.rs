//! The reconnecting upstream feed source.
//!
//! [`UpstreamSource`] owns the single connection to the custody backend's
//! feed and forwards every received payload onto a receive queue that the
//! hub drains.
//!
//! # Connection lifecycle
//!
//! ```text
//!   Closed ──connect()──► Connecting ──dial ok──► Open
//!     ▲                      │  ▲                  │
//!     │        window spent  │  └─ dial failed,    │ read error
//!     └──────────────────────┘     sleep interval  │ (reconnect)
//!     ▲                                            │
//!     └─────────────── disconnect() ◄──────────────┘
//! ```
//!
//! A read error while the reconnect flag is set restarts `connect()`. Once
//! `disconnect()` clears the flag, or the reconnect window runs out, the
//! listen loop exits and the receive queue is closed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::connection::{ConnectionError, FeedConnection, FeedDialer};
use crate::agent::AgentSigner;
use crate::types::ConnectionState;

/// Depth of the receive queue between the source and the hub.
///
/// Kept at one so that a hub that stops draining stalls the read loop.
const RECEIVE_QUEUE_DEPTH: usize = 1;

/// Reconnect policy for the upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Total time `connect()` keeps retrying before giving up.
    pub timeout: Duration,

    /// Pause between failed attempts.
    pub interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(5),
        }
    }
}

/// Why a single connect attempt failed.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The signer could not produce an auth token.
    #[error("failed to obtain connection auth token: {0}")]
    AuthToken(String),

    /// Dialing the feed failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Read-only view of a source, for health reporting.
pub trait SourceStats: Send + Sync {
    fn feed_url(&self) -> &str;

    fn ready_state(&self) -> ConnectionState;
}

/// A feed the hub can drive.
pub trait FeedSource: SourceStats + 'static {
    /// Opens the connection, retrying within the reconnect window.
    ///
    /// Returns `true` once the state is `Open`, `false` if the window ran
    /// out (state `Closed`).
    fn connect(&self) -> impl Future<Output = bool> + Send;

    /// Reads until disconnected or reconnection gives up, then closes the
    /// receive queue. `ready` fires once the loop has started.
    fn listen(&self, ready: oneshot::Sender<()>) -> impl Future<Output = ()> + Send;

    /// Requests a close and disables reconnection.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    /// Hands out the receive queue. Only the first call returns it.
    fn take_receiver(&self) -> Option<mpsc::Receiver<Bytes>>;
}

/// Websocket-backed feed source with automatic reconnection.
pub struct UpstreamSource<D: FeedDialer, S> {
    dialer: D,
    signer: S,
    feed_url: String,
    config: ReconnectConfig,

    state: watch::Sender<ConnectionState>,
    should_reconnect: AtomicBool,

    /// The current connection while no listen loop holds it.
    conn: tokio::sync::Mutex<Option<D::Connection>>,

    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: Mutex<Option<mpsc::Receiver<Bytes>>>,

    shutdown: CancellationToken,
}

impl<D: FeedDialer, S: AgentSigner> UpstreamSource<D, S> {
    pub fn new(dialer: D, signer: S, feed_url: impl Into<String>, config: ReconnectConfig) -> Self {
        let (tx, rx) = mpsc::channel(RECEIVE_QUEUE_DEPTH);
        let (state, _) = watch::channel(ConnectionState::Closed);

        UpstreamSource {
            dialer,
            signer,
            feed_url: feed_url.into(),
            config,
            state,
            should_reconnect: AtomicBool::new(true),
            conn: tokio::sync::Mutex::new(None),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribes to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Feed state changed");
        }
    }

    /// One dial attempt with a freshly minted token.
    async fn dial(&self) -> Result<D::Connection, SourceError> {
        let token = self
            .signer
            .connection_auth_token()
            .map_err(|e| SourceError::AuthToken(e.to_string()))?;
        Ok(self.dialer.dial(&self.feed_url, &token).await?)
    }

    async fn close_connection(conn: &mut D::Connection) {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Close on feed connection failed");
        }
    }
}

impl<D: FeedDialer, S: AgentSigner> SourceStats for UpstreamSource<D, S> {
    fn feed_url(&self) -> &str {
        &self.feed_url
    }

    fn ready_state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

impl<D: FeedDialer, S: AgentSigner> FeedSource for UpstreamSource<D, S> {
    #[instrument(skip(self), fields(feed_url = %self.feed_url))]
    async fn connect(&self) -> bool {
        self.set_state(ConnectionState::Connecting);

        let start = Instant::now();
        while start.elapsed() < self.config.timeout {
            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                attempt = self.dial() => attempt,
            };
            match attempt {
                Ok(conn) => {
                    *self.conn.lock().await = Some(conn);
                    self.set_state(ConnectionState::Open);

                    // A disconnect() that ran during the dial must win.
                    if !self.should_reconnect.load(Ordering::SeqCst) {
                        let raced = self.conn.lock().await.take();
                        if let Some(mut conn) = raced {
                            Self::close_connection(&mut conn).await;
                        }
                        warn!("Feed disconnected while dialing");
                        break;
                    }

                    info!("Connected to feed");
                    return true;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in = ?self.config.interval,
                        "Cannot connect to feed"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.interval) => {}
                    }
                }
            }
        }

        self.set_state(ConnectionState::Closed);
        false
    }

    #[instrument(skip(self, ready), fields(feed_url = %self.feed_url))]
    async fn listen(&self, ready: oneshot::Sender<()>) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = ready.send(());

        let Some(tx) = tx else {
            warn!("Feed is already being listened to");
            return;
        };

        let mut conn = self.conn.lock().await.take();
        loop {
            let read = match conn.as_mut() {
                Some(active) => tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    read = active.read_message() => read,
                },
                None => Err(ConnectionError::Closed),
            };

            match read {
                Ok(payload) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        sent = tx.send(payload) => {
                            if sent.is_err() {
                                debug!("Receive queue dropped, stopping");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    if !self.should_reconnect.load(Ordering::SeqCst) {
                        break;
                    }
                    error!(error = %e, "Unexpected feed connection error");

                    if let Some(mut broken) = conn.take() {
                        Self::close_connection(&mut broken).await;
                    }
                    self.set_state(ConnectionState::Closed);

                    if !self.connect().await {
                        break;
                    }
                    conn = self.conn.lock().await.take();
                }
            }
        }

        if let Some(mut active) = conn.take() {
            Self::close_connection(&mut active).await;
        }
        // Dropping the sender closes the receive queue.
        drop(tx);
        debug!("Feed listener stopped");
    }

    #[instrument(skip(self), fields(feed_url = %self.feed_url))]
    async fn disconnect(&self) {
        info!("Disconnecting from feed");
        if self.ready_state() == ConnectionState::Closed {
            warn!("Disconnect requested on a feed that is already closed");
        }

        self.should_reconnect.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Closed);
        self.shutdown.cancel();

        // If no listen loop holds the connection, close it here.
        if let Some(mut conn) = self.conn.lock().await.take()
            && let Err(e) = conn.close().await
        {
            error!(error = %e, "Error sending close frame");
        }
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
