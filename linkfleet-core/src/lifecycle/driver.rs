/*
  Lifecycle driver

  One task per account. Owns the state machine and every connection the
  lifecycle opens:

    open connection ──► select! {
                          cancel            -> end, unregister, stop
                          connect deadline  -> Input::Timeout (Connecting only)
                          pairing probe     -> request code if no creds.json
                          event             -> persist creds | Input::Transport
                        }
                        └─► execute actions in order
                              ScheduleReconnect -> sleep (cancellable), reopen
                              Finish            -> record outcome, stop

  The ticket resolves once: on the first open, or with the terminal error.
  The terminal error is handed back from `run` in an `Exit` so the caller
  can release the account before the ticket sees it.
*/

use super::errors::{LifecycleError, LifecycleResult};
use super::machine::{Action, Input, Machine, Outcome};
use super::pairing::format_pairing_code;
use crate::account::{AccountId, AuthState, CredentialBlob};
use crate::config::LifecycleConfig;
use crate::metrics::{record_failure, CONNECT_ATTEMPTS, PAIRING_CODES, RECONNECTS, SESSIONS_OPENED};
use crate::notify::{Status, StatusReporter};
use crate::protocol::{
    Connection, ConnectionEvent, ConnectionHandle, ConnectionUpdate, Connector, DisconnectCause,
    ProtocolError,
};
use crate::registry::HandleRegistry;
use crate::session_store::SessionStore;
use metrics::counter;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// What the driver does after a batch of actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Stay,
    Reconnect,
    Finished,
    Cancelled,
}

enum Opened {
    Ready(Connection),
    Failed(ProtocolError),
    TimedOut,
}

/// State scoped to a single connection
struct Live {
    handle: Option<Arc<dyn ConnectionHandle>>,
    probe_at: Option<Instant>,
    probed: bool,
}

impl Live {
    fn new(handle: Option<Arc<dyn ConnectionHandle>>) -> Self {
        Self {
            handle,
            probe_at: None,
            probed: false,
        }
    }
}

/// What is left to deliver when the task ends
pub(crate) struct Exit {
    resolve: Option<oneshot::Sender<LifecycleResult<()>>>,
    result: LifecycleResult<()>,
}

impl Exit {
    /// Resolve the ticket if the first open did not already
    pub(crate) fn deliver(self) {
        if let Some(tx) = self.resolve {
            // The caller may have dropped the ticket
            let _ = tx.send(self.result);
        }
    }
}

pub(crate) struct Driver {
    account: AccountId,
    connector: Arc<dyn Connector>,
    store: Arc<SessionStore>,
    registry: HandleRegistry,
    config: LifecycleConfig,
    reporter: StatusReporter,
    resolve: Option<oneshot::Sender<LifecycleResult<()>>>,
    terminal: Option<LifecycleError>,
}

impl Driver {
    pub(crate) fn new(
        account: AccountId,
        connector: Arc<dyn Connector>,
        store: Arc<SessionStore>,
        registry: HandleRegistry,
        config: LifecycleConfig,
        reporter: StatusReporter,
        resolve: oneshot::Sender<LifecycleResult<()>>,
    ) -> Self {
        Self {
            account,
            connector,
            store,
            registry,
            config,
            reporter,
            resolve: Some(resolve),
            terminal: None,
        }
    }

    pub(crate) async fn run(mut self, mut cancel: oneshot::Receiver<()>) -> Exit {
        let known_session = self.store.has_credentials(&self.account).await;
        let mut machine = Machine::new(self.config.reconnect.clone(), known_session);
        info!(account = %self.account, known_session, "session lifecycle starting");

        let start = machine.step(Input::Start);
        let mut live = Live::new(None);
        self.apply(start, &mut machine, &mut live, &mut cancel).await;

        loop {
            let deadline = Instant::now() + self.config.connect_timeout;
            let opened = tokio::select! {
                biased;
                _ = &mut cancel => {
                    self.cancelled(&live).await;
                    return self.exit();
                }
                _ = sleep_until(deadline) => Opened::TimedOut,
                result = self.open_connection() => match result {
                    Ok(connection) => Opened::Ready(connection),
                    Err(e) => Opened::Failed(e),
                },
            };

            let flow = match opened {
                Opened::Ready(connection) => {
                    self.drive(connection, deadline, &mut machine, &mut cancel).await
                }
                Opened::Failed(e) => {
                    warn!(account = %self.account, error = %e, "failed to open connection");
                    let cause = DisconnectCause::new(None, e.to_string());
                    let input = Input::Transport(ConnectionUpdate::close(Some(cause)));
                    self.apply_detached(input, &mut machine, &mut cancel).await
                }
                Opened::TimedOut => {
                    warn!(account = %self.account, "connector did not return before the deadline");
                    self.apply_detached(Input::Timeout, &mut machine, &mut cancel).await
                }
            };

            match flow {
                Flow::Reconnect => continue,
                Flow::Stay | Flow::Finished | Flow::Cancelled => break,
            }
        }

        debug!(
            account = %self.account,
            phase = ?machine.phase(),
            ever_opened = machine.ever_opened(),
            "session lifecycle stopped"
        );
        self.exit()
    }

    fn exit(&mut self) -> Exit {
        Exit {
            resolve: self.resolve.take(),
            result: Err(self.terminal.take().unwrap_or(LifecycleError::Cancelled)),
        }
    }

    /// Step the machine for an attempt that never produced a connection
    async fn apply_detached(
        &mut self,
        input: Input,
        machine: &mut Machine,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Flow {
        let mut live = Live::new(None);
        let actions = machine.step(input);
        let flow = self.apply(actions, machine, &mut live, cancel).await;
        if flow == Flow::Cancelled {
            self.cancelled(&live).await;
        }
        flow
    }

    async fn open_connection(&self) -> Result<Connection, ProtocolError> {
        let credentials = self
            .store
            .load_credentials(&self.account)
            .await
            .map_err(|e| ProtocolError::ConnectFailed(e.to_string()))?;
        let auth = AuthState {
            account: self.account.clone(),
            credentials,
        };

        counter!(CONNECT_ATTEMPTS).increment(1);
        debug!(account = %self.account, registered = auth.is_registered(), "opening connection");
        self.connector.connect(auth).await
    }

    /// Consume one connection's events until it closes or the lifecycle ends
    async fn drive(
        &mut self,
        connection: Connection,
        deadline: Instant,
        machine: &mut Machine,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Flow {
        let Connection { handle, mut events } = connection;
        let mut live = Live::new(Some(handle));
        let mut stream_ended = false;

        let flow = loop {
            let probe_at = live.probe_at;
            let input = tokio::select! {
                biased;
                _ = &mut *cancel => break Flow::Cancelled,
                _ = sleep_until(deadline), if machine.is_connecting() => Input::Timeout,
                _ = sleep_until(probe_at.unwrap_or(deadline)),
                    if probe_at.is_some() && machine.is_connecting() =>
                {
                    live.probe_at = None;
                    if let Some(handle) = live.handle.clone() {
                        tokio::select! {
                            biased;
                            _ = &mut *cancel => break Flow::Cancelled,
                            _ = self.probe_pairing(&handle) => {}
                        }
                    }
                    continue;
                }
                event = events.recv(), if !stream_ended => match event {
                    Some(ConnectionEvent::CredentialsUpdated(blob)) => {
                        self.persist(&blob).await;
                        continue;
                    }
                    Some(ConnectionEvent::Update(update)) => Input::Transport(update),
                    None => {
                        stream_ended = true;
                        Input::Transport(ConnectionUpdate::close(Some(DisconnectCause::new(
                            None,
                            "event stream ended",
                        ))))
                    }
                },
            };

            let actions = machine.step(input);
            match self.apply(actions, machine, &mut live, cancel).await {
                Flow::Stay => continue,
                other => break other,
            }
        };

        if flow == Flow::Cancelled {
            self.cancelled(&live).await;
        }
        flow
    }

    async fn apply(
        &mut self,
        actions: Vec<Action>,
        machine: &mut Machine,
        live: &mut Live,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Flow {
        let mut flow = Flow::Stay;

        for action in actions {
            match action {
                Action::ProbePairing => {
                    if !live.probed && live.handle.is_some() {
                        live.probed = true;
                        live.probe_at = Some(Instant::now() + self.config.pairing_probe_delay);
                    }
                }
                Action::Register => {
                    live.probe_at = None;
                    if let Some(handle) = &live.handle {
                        self.registry.put(self.account.clone(), handle.clone()).await;
                        counter!(SESSIONS_OPENED).increment(1);
                        info!(account = %self.account, "session open");
                    }
                }
                Action::Unregister => {
                    if let Some(handle) = &live.handle {
                        self.registry.remove_if_same(&self.account, handle).await;
                    }
                }
                Action::MarkActive => match self.store.mark_active(&self.account).await {
                    Ok(true) => debug!(account = %self.account, "added to active list"),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(account = %self.account, error = %e, "failed to update active list")
                    }
                },
                Action::Purge => self.purge().await,
                Action::EndConnection => {
                    if let Some(handle) = live.handle.take() {
                        handle.end().await;
                    }
                }
                Action::Notify(status) => self.reporter.report(status).await,
                Action::ResolveOpened => self.resolve_opened(),
                Action::ScheduleReconnect { attempt, delay } => {
                    counter!(RECONNECTS).increment(1);
                    info!(account = %self.account, attempt, ?delay, "reconnect scheduled");
                    tokio::select! {
                        biased;
                        _ = &mut *cancel => return Flow::Cancelled,
                        _ = sleep(delay) => {}
                    }
                    machine.step(Input::ReconnectDue);
                    flow = Flow::Reconnect;
                }
                Action::Finish(outcome) => {
                    self.finish(outcome);
                    flow = Flow::Finished;
                }
            }
        }

        flow
    }

    async fn probe_pairing(&mut self, handle: &Arc<dyn ConnectionHandle>) {
        if self.store.has_credentials(&self.account).await {
            debug!(account = %self.account, "credentials present, skipping pairing code");
            return;
        }

        match handle.request_pairing_code(&self.account).await {
            Ok(raw) => {
                counter!(PAIRING_CODES).increment(1);
                info!(account = %self.account, "pairing code issued");
                self.reporter
                    .report(Status::PairingCode(format_pairing_code(&raw)))
                    .await;
            }
            Err(e) => {
                warn!(account = %self.account, error = %e, "pairing code request failed");
                self.reporter.report(Status::PairingError(e.to_string())).await;
            }
        }
    }

    async fn persist(&self, blob: &CredentialBlob) {
        if let Err(e) = self.store.save_credentials(&self.account, blob).await {
            warn!(account = %self.account, error = %e, "failed to persist credentials");
        }
    }

    async fn purge(&self) {
        if let Err(e) = self.store.delete_credentials(&self.account).await {
            warn!(account = %self.account, error = %e, "failed to delete session directory");
        }
        if let Err(e) = self.store.remove_active(&self.account).await {
            warn!(account = %self.account, error = %e, "failed to update active list");
        }
        info!(account = %self.account, "session state purged");
    }

    fn finish(&mut self, outcome: Outcome) {
        record_failure(outcome.reason());
        warn!(account = %self.account, reason = outcome.reason(), "session lifecycle ended");
        self.terminal = Some(LifecycleError::from(outcome));
    }

    async fn cancelled(&mut self, live: &Live) {
        if let Some(handle) = &live.handle {
            handle.end().await;
            self.registry.remove_if_same(&self.account, handle).await;
        }
        debug!(account = %self.account, "session lifecycle cancelled");
        self.terminal = Some(LifecycleError::Cancelled);
    }

    fn resolve_opened(&mut self) {
        if let Some(tx) = self.resolve.take() {
            let _ = tx.send(Ok(()));
        }
    }
}
