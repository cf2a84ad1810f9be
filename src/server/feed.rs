//! Websocket re-publication of the upstream feed.
//!
//! Each connection registers an external feed client with the hub and
//! writes every payload it receives as a text frame. A connection lives
//! until the consumer goes away, a write misses its deadline, or the hub
//! drops the client.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, instrument, warn};

use super::{AppState, FeedClientConfig};
use crate::approver::ActionService;
use crate::hub::{FeedReceiver, FeedSource};

/// Upgrades the request and serves the feed on the resulting socket.
pub async fn client_feed_handler<S: FeedSource, M: ActionService>(
    State(state): State<AppState<S, M>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let feed = state.hub().subscribe(false);
        let id = feed.id();
        serve_feed_client(socket, feed, state.feed_config()).await;
        state.hub().unregister_client(id);
    })
}

/// Why a feed connection ended.
#[derive(Debug, PartialEq, Eq)]
enum FeedEnd {
    /// The hub dropped the client or shut down.
    HubClosed,
    /// The consumer closed the socket or it failed.
    ClientGone,
    /// A frame could not be written in time.
    WriteFailed,
}

#[instrument(skip_all, fields(client = %feed.id()))]
async fn serve_feed_client(socket: WebSocket, mut feed: FeedReceiver, config: FeedClientConfig) {
    let (mut sink, mut stream) = socket.split();
    let mut ping = interval_at(
        tokio::time::Instant::now() + config.ping_period,
        config.ping_period,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Feed client connected");

    let end = loop {
        tokio::select! {
            payload = feed.recv() => {
                let Some(payload) = payload else {
                    let _ = write_frame(&mut sink, Message::Close(None), config.write_wait).await;
                    break FeedEnd::HubClosed;
                };
                let text = String::from_utf8_lossy(&payload).into_owned();
                if let Err(e) = write_frame(&mut sink, Message::Text(text.into()), config.write_wait).await {
                    warn!(error = %e, "Failed to write feed payload");
                    break FeedEnd::WriteFailed;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    warn!(error = %e, "Failed to ping feed client");
                    break FeedEnd::WriteFailed;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break FeedEnd::ClientGone,
                Some(Err(e)) => {
                    debug!(error = %e, "Feed client read failed");
                    break FeedEnd::ClientGone;
                }
                Some(Ok(_)) => {}
            },
        }
    };

    info!(reason = ?end, "Feed client disconnected");
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("websocket write failed: {0}")]
    Socket(#[from] axum::Error),

    #[error("write exceeded {0:?}")]
    Deadline(Duration),
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), WriteError> {
    timeout(write_wait, sink.send(message))
        .await
        .map_err(|_| WriteError::Deadline(write_wait))??;
    Ok(())
}
