//! In-memory stand-ins for the protocol layer and the status channel
//!
//! `ScriptedConnector` hands every opened connection to the test, which then
//! drives it by pushing events:
//!
//! ```ignore
//! let connector = Arc::new(ScriptedConnector::new());
//! let ticket = manager.connect(id, None).await?;
//! let conn = connector.next_connection().await;
//! conn.connecting().await;
//! conn.open().await;
//! ticket.resolved().await?;
//! ```

use super::async_helpers::{recv_timeout, DEFAULT_TEST_TIMEOUT};
use crate::account::{AccountId, AuthState, CredentialBlob};
use crate::notify::{MessageRef, NotifyError, StatusNotifier};
use crate::protocol::{
    Connection, ConnectionEvent, ConnectionHandle, ConnectionUpdate, Connector, DisconnectCause,
    ProtocolError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// Handle that does nothing
pub struct NoopHandle;

#[async_trait]
impl ConnectionHandle for NoopHandle {
    async fn request_pairing_code(&self, _account: &AccountId) -> Result<String, ProtocolError> {
        Err(ProtocolError::Closed)
    }

    async fn end(&self) {}
}

/// Handle recording pairing requests and `end()` calls
pub struct ScriptedHandle {
    pairing_code: Result<String, String>,
    hang_pairing: bool,
    pairing_requests: AtomicUsize,
    pairing_requested: Notify,
    ended: AtomicBool,
}

impl ScriptedHandle {
    fn new(pairing_code: Result<String, String>, hang_pairing: bool) -> Self {
        Self {
            pairing_code,
            hang_pairing,
            pairing_requests: AtomicUsize::new(0),
            pairing_requested: Notify::new(),
            ended: AtomicBool::new(false),
        }
    }

    pub fn pairing_requests(&self) -> usize {
        self.pairing_requests.load(Ordering::SeqCst)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Wait until at least one pairing code has been requested
    pub async fn pairing_requested(&self) {
        if self.pairing_requests() > 0 {
            return;
        }
        self.pairing_requested.notified().await;
    }
}

#[async_trait]
impl ConnectionHandle for ScriptedHandle {
    async fn request_pairing_code(&self, _account: &AccountId) -> Result<String, ProtocolError> {
        self.pairing_requests.fetch_add(1, Ordering::SeqCst);
        self.pairing_requested.notify_one();
        if self.hang_pairing {
            std::future::pending::<()>().await;
        }
        self.pairing_code
            .clone()
            .map_err(ProtocolError::PairingRequest)
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

/// Test side of one opened connection
pub struct ScriptedConnection {
    pub auth: AuthState,
    pub handle: Arc<ScriptedHandle>,
    events: mpsc::Sender<ConnectionEvent>,
}

impl ScriptedConnection {
    /// Deliver an event; ignored once the driver has let go of the connection
    pub async fn send(&self, event: ConnectionEvent) {
        let _ = self.events.send(event).await;
    }

    pub async fn connecting(&self) {
        self.send(ConnectionEvent::Update(ConnectionUpdate::connecting()))
            .await;
    }

    pub async fn open(&self) {
        self.send(ConnectionEvent::Update(ConnectionUpdate::open())).await;
    }

    pub async fn close(&self, cause: Option<DisconnectCause>) {
        self.send(ConnectionEvent::Update(ConnectionUpdate::close(cause)))
            .await;
    }

    pub async fn close_with_status(&self, code: u16) {
        self.close(Some(DisconnectCause::with_status(code))).await;
    }

    pub async fn credentials(&self, bytes: &[u8]) {
        self.send(ConnectionEvent::CredentialsUpdated(CredentialBlob::new(bytes)))
            .await;
    }

    /// Close the event stream without a close update
    pub fn drop_stream(self) {}
}

enum Planned {
    Accept,
    Fail(String),
}

/// Connector whose connections are driven by the test
pub struct ScriptedConnector {
    plan: Mutex<VecDeque<Planned>>,
    pairing_code: Mutex<Result<String, String>>,
    hang_pairing: AtomicBool,
    auths: Mutex<Vec<AuthState>>,
    handles: Mutex<Vec<Arc<ScriptedHandle>>>,
    opened_tx: mpsc::UnboundedSender<ScriptedConnection>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ScriptedConnection>>,
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnector {
    pub fn new() -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            plan: Mutex::new(VecDeque::new()),
            pairing_code: Mutex::new(Ok("ABCDEFGH".to_string())),
            hang_pairing: AtomicBool::new(false),
            auths: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            opened_tx,
            opened_rx: tokio::sync::Mutex::new(opened_rx),
        }
    }

    /// Code returned by every subsequent pairing request
    pub fn set_pairing_code(&self, code: Result<String, String>) {
        *self.pairing_code.lock().unwrap() = code;
    }

    /// Pairing requests on later connections never return
    pub fn hang_pairing_requests(&self) {
        self.hang_pairing.store(true, Ordering::SeqCst);
    }

    /// Make the next `connect` call fail
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.plan
            .lock()
            .unwrap()
            .push_back(Planned::Fail(message.into()));
    }

    /// Next connection opened by a driver
    pub async fn next_connection(&self) -> ScriptedConnection {
        let mut rx = self.opened_rx.lock().await;
        match recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await {
            Ok(connection) => connection,
            Err(e) => panic!("no connection opened: {}", e),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.auths.lock().unwrap().len()
    }

    /// Auth state passed to each `connect` call, in order
    pub fn auths(&self) -> Vec<AuthState> {
        self.auths.lock().unwrap().clone()
    }

    /// Pairing requests across every connection
    pub fn pairing_requests(&self) -> usize {
        self.handles
            .lock()
            .unwrap()
            .iter()
            .map(|handle| handle.pairing_requests())
            .sum()
    }

    /// Number of handles that had `end()` called
    pub fn ended_count(&self) -> usize {
        self.handles
            .lock()
            .unwrap()
            .iter()
            .filter(|handle| handle.is_ended())
            .count()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, auth: AuthState) -> Result<Connection, ProtocolError> {
        self.auths.lock().unwrap().push(auth.clone());

        let planned = self.plan.lock().unwrap().pop_front().unwrap_or(Planned::Accept);
        if let Planned::Fail(message) = planned {
            return Err(ProtocolError::ConnectFailed(message));
        }

        let code = self.pairing_code.lock().unwrap().clone();
        let hang = self.hang_pairing.load(Ordering::SeqCst);
        let handle = Arc::new(ScriptedHandle::new(code, hang));
        self.handles.lock().unwrap().push(handle.clone());

        let (events_tx, events_rx) = mpsc::channel(32);
        let _ = self.opened_tx.send(ScriptedConnection {
            auth,
            handle: handle.clone(),
            events: events_tx,
        });

        Ok(Connection {
            handle,
            events: events_rx,
        })
    }
}

/// Notifier keeping every successfully delivered text
#[derive(Default)]
pub struct RecordingNotifier {
    posts: Mutex<Vec<String>>,
    edits: Mutex<Vec<String>>,
    history: Mutex<Vec<String>>,
    fail_posts: AtomicBool,
    fail_edits: AtomicBool,
    next_id: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::SeqCst);
    }

    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<String> {
        self.edits.lock().unwrap().clone()
    }

    /// Every delivered text, posts and edits interleaved
    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Option<String> {
        self.history.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl StatusNotifier for RecordingNotifier {
    async fn post(&self, text: &str) -> Result<MessageRef, NotifyError> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("post rejected".to_string()));
        }
        self.posts.lock().unwrap().push(text.to_string());
        self.history.lock().unwrap().push(text.to_string());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MessageRef(format!("msg-{}", id)))
    }

    async fn edit(&self, _message: &MessageRef, text: &str) -> Result<(), NotifyError> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(NotifyError::NotEditable("edit rejected".to_string()));
        }
        self.edits.lock().unwrap().push(text.to_string());
        self.history.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
