//! Feed client handles.
//!
//! A feed client is split in two halves: the [`FeedClient`] sending half is
//! registered with the hub, and the [`FeedReceiver`] half is kept by the
//! consumer. Dropping the sending half (unregister, slow-client drop, hub
//! shutdown) is how the hub closes a client's queue.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::types::ClientId;

/// Queue depth of a feed client.
///
/// A client more than this many payloads behind is considered stalled and is
/// dropped by the hub on the next broadcast.
pub const FEED_CLIENT_BUFFER: usize = 32;

/// Outcome of a non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The payload was queued.
    Queued,

    /// The client's queue is full.
    Full,

    /// The consumer dropped its receiver.
    Gone,
}

/// The hub-side half of a feed client.
#[derive(Debug)]
pub struct FeedClient {
    id: ClientId,
    tx: mpsc::Sender<Bytes>,
    is_internal: bool,
}

/// The consumer-side half of a feed client.
#[derive(Debug)]
pub struct FeedReceiver {
    id: ClientId,
    rx: mpsc::Receiver<Bytes>,
    is_internal: bool,
}

impl FeedClient {
    /// Creates a client with the default queue depth.
    ///
    /// `is_internal` marks the auto-approver's own subscription; it is only
    /// used for reporting.
    pub fn new(is_internal: bool) -> (FeedClient, FeedReceiver) {
        Self::with_capacity(is_internal, FEED_CLIENT_BUFFER)
    }

    /// Creates a client with an explicit queue depth (at least 1).
    pub fn with_capacity(is_internal: bool, capacity: usize) -> (FeedClient, FeedReceiver) {
        let id = ClientId::next();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            FeedClient {
                id,
                tx,
                is_internal,
            },
            FeedReceiver {
                id,
                rx,
                is_internal,
            },
        )
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    /// Attempts to queue `payload` without waiting.
    pub fn try_deliver(&self, payload: Bytes) -> Delivery {
        match self.tx.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }
}

impl FeedReceiver {
    /// Waits for the next payload.
    ///
    /// Returns `None` once the hub has closed this client's queue and every
    /// queued payload has been read.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }
}
