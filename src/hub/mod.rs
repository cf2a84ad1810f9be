//! Feed distribution: the upstream source and the fan-out hub.

pub mod client;
pub mod connection;
pub mod feed_hub;
pub mod source;

pub use client::{FEED_CLIENT_BUFFER, FeedClient, FeedReceiver};
pub use connection::{
    AUTH_HEADER, ConnectionError, FeedConnection, FeedDialer, WebsocketConnection, WebsocketDialer,
};
pub use feed_hub::FeedHub;
pub use source::{FeedSource, ReconnectConfig, SourceError, SourceStats, UpstreamSource};
