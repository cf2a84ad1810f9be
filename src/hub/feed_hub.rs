//! Fan-out from the upstream source to every registered feed client.
//!
//! # Architecture
//!
//! ```text
//!                                            ┌──► client 1 (external)
//! ┌──────────┐  receive  ┌───────────────┐   │
//! │ upstream │ ────────► │ broadcast     │ ──┼──► client 2 (external)
//! │ source   │   queue   │ loop          │   │
//! └──────────┘           └───────────────┘   └──► auto-approver (internal)
//! ```
//!
//! Delivery to a client never waits: a client whose queue is full is
//! dropped on the spot, so one stalled consumer cannot delay the others.
//! The client set lock is held for the whole broadcast step, which keeps
//! "detect full" and "remove" atomic with respect to (un)registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument};

use super::client::{Delivery, FeedClient, FeedReceiver};
use super::source::FeedSource;
use crate::types::{ClientId, ConnectionState};

/// The feed hub.
///
/// Cheap to clone; clones share the client set and the source.
pub struct FeedHub<S> {
    inner: Arc<HubInner<S>>,
}

struct HubInner<S> {
    source: Arc<S>,
    clients: Mutex<HashMap<ClientId, FeedClient>>,
    running: AtomicBool,
}

impl<S> Clone for FeedHub<S> {
    fn clone(&self) -> Self {
        FeedHub {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: FeedSource> FeedHub<S> {
    pub fn new(source: Arc<S>) -> Self {
        FeedHub {
            inner: Arc::new(HubInner {
                source,
                clients: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the upstream source.
    pub fn source(&self) -> &Arc<S> {
        &self.inner.source
    }

    /// True while the broadcast loop is draining the source.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Connects the source and starts the broadcast and listen tasks.
    ///
    /// Returns once both tasks have signalled readiness. Returns `false`
    /// without starting anything if the initial connect fails.
    #[instrument(skip(self), fields(feed_url = %self.inner.source.feed_url()))]
    pub async fn run(&self) -> bool {
        if !self.inner.source.connect().await {
            return false;
        }

        let Some(rx) = self.inner.source.take_receiver() else {
            error!("Feed source receive queue already taken; hub cannot start twice");
            return false;
        };

        let (hub_ready_tx, hub_ready_rx) = oneshot::channel();
        let (source_ready_tx, source_ready_rx) = oneshot::channel();

        tokio::spawn(self.clone().broadcast_loop(rx, hub_ready_tx));
        let source = Arc::clone(&self.inner.source);
        tokio::spawn(async move { source.listen(source_ready_tx).await });

        let _ = hub_ready_rx.await;
        let _ = source_ready_rx.await;
        true
    }

    /// Disconnects the source if it is open.
    ///
    /// The broadcast loop then sees the receive queue close and closes every
    /// remaining client.
    pub async fn stop(&self) {
        if self.inner.source.ready_state() == ConnectionState::Open {
            self.inner.source.disconnect().await;
        }
    }

    /// Adds a client to the broadcast set.
    pub fn register_client(&self, client: FeedClient) -> ClientId {
        let id = client.id();
        let internal = client.is_internal();
        self.lock_clients().insert(id, client);
        info!(client = %id, internal, "Feed client registered");
        id
    }

    /// Creates a client, registers it and returns the consumer half.
    pub fn subscribe(&self, is_internal: bool) -> FeedReceiver {
        let (client, receiver) = FeedClient::new(is_internal);
        self.register_client(client);
        receiver
    }

    /// Removes a client and closes its queue.
    ///
    /// Returns `false` if the client was not registered (already dropped or
    /// unregistered).
    pub fn unregister_client(&self, id: ClientId) -> bool {
        let removed = self.lock_clients().remove(&id);
        if removed.is_some() {
            info!(client = %id, "Feed client unregistered");
        }
        removed.is_some()
    }

    /// Number of registered clients that are not internal.
    pub fn external_feed_clients(&self) -> usize {
        self.lock_clients()
            .values()
            .filter(|client| !client.is_internal())
            .count()
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<ClientId, FeedClient>> {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn broadcast_loop(self, mut rx: mpsc::Receiver<Bytes>, ready: oneshot::Sender<()>) {
        self.inner.running.store(true, Ordering::SeqCst);
        let _ = ready.send(());

        while let Some(payload) = rx.recv().await {
            self.broadcast(payload);
        }

        info!("Broadcast channel closed");
        self.inner.running.store(false, Ordering::SeqCst);
        self.clean_up();
    }

    /// Delivers `payload` to every client, dropping those that cannot take it.
    fn broadcast(&self, payload: Bytes) {
        let mut clients = self.lock_clients();
        debug!(
            payload = %String::from_utf8_lossy(&payload),
            clients = clients.len(),
            "Message received"
        );

        clients.retain(|id, client| match client.try_deliver(payload.clone()) {
            Delivery::Queued => true,
            Delivery::Full => {
                debug!(client = %id, "Client not listening, removing client");
                false
            }
            Delivery::Gone => {
                debug!(client = %id, "Client went away, removing client");
                false
            }
        });
    }

    /// Closes every remaining client.
    fn clean_up(&self) {
        let mut clients = self.lock_clients();
        if !clients.is_empty() {
            info!(clients = clients.len(), "Closing feed clients");
        }
        clients.clear();
    }
}
