//! Shared fakes for unit tests: scripted network, signer, custody client
//! and feed source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::agent::{ActionClient, AgentSigner};
use crate::hub::{ConnectionError, FeedConnection, FeedDialer, FeedSource, SourceStats};
use crate::types::{ActionId, ConnectionState};

/// Error returned by every fake.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FakeError(pub String);

// ─── Signer ───

/// Signer returning a fixed token, or failing every call.
#[derive(Debug, Default, Clone)]
pub struct StaticSigner {
    fail: bool,
}

impl StaticSigner {
    pub const TOKEN: &'static [u8] = b"static-token";

    pub fn failing() -> Self {
        StaticSigner { fail: true }
    }
}

impl AgentSigner for StaticSigner {
    type Error = FakeError;

    fn sign_approval_digest(
        &self,
        _action_id: &ActionId,
        message_hashes: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, FakeError> {
        if self.fail {
            return Err(FakeError("signing disabled".into()));
        }
        Ok(message_hashes.to_vec())
    }

    fn connection_auth_token(&self) -> Result<Vec<u8>, FakeError> {
        if self.fail {
            return Err(FakeError("token unavailable".into()));
        }
        Ok(Self::TOKEN.to_vec())
    }
}

// ─── Network ───

/// What the next dial produces.
pub enum Script {
    /// The dial fails.
    Fail,
    /// A connection that yields these payloads, then errors.
    Messages(Vec<&'static str>),
    /// A connection that never yields anything.
    Hang,
    /// Like `Hang`, but the dial itself takes this long.
    Slow(Duration),
}

/// Dialer that plays back a queue of [`Script`]s. Dials past the end fail.
#[derive(Clone, Default)]
pub struct FakeDialer {
    state: Arc<DialerState>,
}

#[derive(Default)]
struct DialerState {
    scripts: Mutex<VecDeque<Script>>,
    dials: AtomicUsize,
    closes: Arc<AtomicUsize>,
    tokens: Mutex<Vec<Vec<u8>>>,
}

impl FakeDialer {
    pub fn new(scripts: Vec<Script>) -> Self {
        let dialer = FakeDialer::default();
        *dialer.state.scripts.lock().unwrap() = scripts.into();
        dialer
    }

    pub fn always_failing() -> Self {
        FakeDialer::default()
    }

    pub fn dial_count(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<Vec<u8>> {
        self.state.tokens.lock().unwrap().clone()
    }
}

pub struct FakeConnection {
    messages: VecDeque<Bytes>,
    hang: bool,
    closes: Arc<AtomicUsize>,
}

impl FeedDialer for FakeDialer {
    type Connection = FakeConnection;

    async fn dial(&self, _url: &str, auth_token: &[u8]) -> Result<FakeConnection, ConnectionError> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);
        self.state.tokens.lock().unwrap().push(auth_token.to_vec());

        let script = self.state.scripts.lock().unwrap().pop_front();
        let closes = Arc::clone(&self.state.closes);
        if let Some(Script::Slow(delay)) = &script {
            tokio::time::sleep(*delay).await;
        }
        match script {
            Some(Script::Messages(messages)) => Ok(FakeConnection {
                messages: messages
                    .into_iter()
                    .map(|m| Bytes::from_static(m.as_bytes()))
                    .collect(),
                hang: false,
                closes,
            }),
            Some(Script::Hang) | Some(Script::Slow(_)) => Ok(FakeConnection {
                messages: VecDeque::new(),
                hang: true,
                closes,
            }),
            Some(Script::Fail) | None => Err(ConnectionError::Closed),
        }
    }
}

impl FeedConnection for FakeConnection {
    async fn read_message(&mut self) -> Result<Bytes, ConnectionError> {
        if let Some(message) = self.messages.pop_front() {
            return Ok(message);
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        Err(ConnectionError::Closed)
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Custody client ───

/// Action client that records calls and can fail or stall on demand.
#[derive(Default)]
pub struct RecordingActionClient {
    approvals: Mutex<Vec<ActionId>>,
    rejections: Mutex<Vec<ActionId>>,
    approve_calls: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
    approved: Notify,
}

impl RecordingActionClient {
    /// Fails the first `n` approve calls.
    pub fn failing_times(n: usize) -> Self {
        RecordingActionClient {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    /// Fails every call.
    pub fn always_failing() -> Self {
        Self::failing_times(usize::MAX)
    }

    /// Succeeds after sleeping `delay` on every approve call.
    pub fn with_delay(delay: Duration) -> Self {
        RecordingActionClient {
            delay,
            ..Self::default()
        }
    }

    pub fn approvals(&self) -> Vec<ActionId> {
        self.approvals.lock().unwrap().clone()
    }

    pub fn rejections(&self) -> Vec<ActionId> {
        self.rejections.lock().unwrap().clone()
    }

    pub fn approve_calls(&self) -> usize {
        self.approve_calls.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` approvals succeeded.
    pub async fn wait_for_approvals(&self, n: usize) {
        let wait = async {
            loop {
                let notified = self.approved.notified();
                if self.approvals.lock().unwrap().len() >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(30), wait)
            .await
            .expect("timed out waiting for approvals");
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl ActionClient for RecordingActionClient {
    type Error = FakeError;

    async fn approve(&self, action_id: &ActionId) -> Result<(), FakeError> {
        self.approve_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.take_failure() {
            return Err(FakeError(format!("approve {action_id} failed")));
        }
        self.approvals.lock().unwrap().push(action_id.clone());
        self.approved.notify_waiters();
        Ok(())
    }

    async fn reject(&self, action_id: &ActionId) -> Result<(), FakeError> {
        if self.failures_left.load(Ordering::SeqCst) == usize::MAX {
            return Err(FakeError(format!("reject {action_id} failed")));
        }
        self.rejections.lock().unwrap().push(action_id.clone());
        Ok(())
    }
}

// ─── Feed source ───

/// Feed source driven directly by the test.
pub struct FakeSource {
    connect_ok: bool,
    state: Mutex<ConnectionState>,
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    stopped: CancellationToken,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeSource {
    pub fn new(connect_ok: bool) -> Self {
        let (tx, rx) = mpsc::channel(1);
        FakeSource {
            connect_ok,
            state: Mutex::new(ConnectionState::Closed),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            stopped: CancellationToken::new(),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Feeds one payload to the hub, waiting for queue space.
    pub async fn push(&self, payload: &str) {
        let tx = self.tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(Bytes::copy_from_slice(payload.as_bytes())).await;
        }
    }

    /// Simulates the source exhausting its reconnect window.
    pub fn give_up(&self) {
        *self.state.lock().unwrap() = ConnectionState::Closed;
        self.tx.lock().unwrap().take();
        self.stopped.cancel();
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl SourceStats for FakeSource {
    fn feed_url(&self) -> &str {
        "ws://fake.test/feed"
    }

    fn ready_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }
}

impl FeedSource for FakeSource {
    async fn connect(&self) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let state = if self.connect_ok {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        };
        *self.state.lock().unwrap() = state;
        self.connect_ok
    }

    async fn listen(&self, ready: oneshot::Sender<()>) {
        let _ = ready.send(());
        self.stopped.cancelled().await;
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.give_up();
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.rx.lock().unwrap().take()
    }
}
