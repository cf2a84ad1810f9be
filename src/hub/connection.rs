//! Upstream feed connection.
//!
//! The source talks to the custody backend through two small traits so that
//! tests can script the network: a [`FeedDialer`] opens a connection given a
//! fresh auth token, and a [`FeedConnection`] yields payloads until it fails.
//! [`WebsocketDialer`] is the production implementation over
//! `tokio-tungstenite`.

use std::future::Future;

use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, InvalidHeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Header carrying the hex-encoded, per-attempt auth token.
///
/// Shared by the feed dial and the custody REST client.
pub const AUTH_HEADER: &str = "x-api-zkp";

/// Errors from the upstream feed connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Transport or protocol failure.
    #[error("websocket error: {0}")]
    Websocket(#[from] tungstenite::Error),

    /// The auth token could not be encoded as a header value.
    #[error("invalid auth header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    /// The peer closed the stream.
    #[error("feed connection closed")]
    Closed,
}

/// An open upstream feed connection.
pub trait FeedConnection: Send + 'static {
    /// Reads the next payload frame.
    ///
    /// Control frames are consumed internally; an error means the connection
    /// is no longer usable.
    fn read_message(&mut self) -> impl Future<Output = Result<Bytes, ConnectionError>> + Send;

    /// Sends a normal-closure close frame.
    fn close(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}

/// Opens upstream feed connections.
pub trait FeedDialer: Send + Sync + 'static {
    /// The connection type produced by this dialer.
    type Connection: FeedConnection;

    /// Dials `url`, presenting `auth_token` hex-encoded in [`AUTH_HEADER`].
    fn dial(
        &self,
        url: &str,
        auth_token: &[u8],
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

/// Dials the feed over websocket (`ws://` or `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebsocketDialer;

/// A live websocket feed connection.
pub struct WebsocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FeedDialer for WebsocketDialer {
    type Connection = WebsocketConnection;

    async fn dial(&self, url: &str, auth_token: &[u8]) -> Result<WebsocketConnection, ConnectionError> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert(AUTH_HEADER, HeaderValue::from_str(&hex::encode(auth_token))?);

        let (stream, _response) = connect_async(request).await?;
        Ok(WebsocketConnection { stream })
    }
}

impl FeedConnection for WebsocketConnection {
    async fn read_message(&mut self) -> Result<Bytes, ConnectionError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Bytes::from(text)),
                Some(Ok(Message::Binary(data))) => return Ok(Bytes::from(data)),
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}
