//! Session lifecycle manager
//!
//! Starts one [`Driver`] task per account and keeps track of the tasks it
//! spawned. The handle registry only ever holds connections that reached
//! `open`; in-flight attempts live in the manager's own table.

use super::driver::Driver;
use super::errors::{LifecycleError, LifecycleResult};
use crate::account::AccountId;
use crate::config::LifecycleConfig;
use crate::notify::{StatusNotifier, StatusReporter};
use crate::protocol::Connector;
use crate::registry::HandleRegistry;
use crate::session_store::SessionStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct LifecycleEntry {
    generation: u64,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

type LifecycleTable = Arc<Mutex<HashMap<AccountId, LifecycleEntry>>>;

/// Resolves once per connection attempt
pub struct AttemptTicket {
    account: AccountId,
    rx: oneshot::Receiver<LifecycleResult<()>>,
}

impl AttemptTicket {
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// `Ok` on the first open, the terminal error otherwise
    pub async fn resolved(self) -> LifecycleResult<()> {
        self.rx.await.unwrap_or(Err(LifecycleError::Cancelled))
    }
}

pub struct LifecycleManager {
    connector: Arc<dyn Connector>,
    store: Arc<SessionStore>,
    registry: HandleRegistry,
    config: LifecycleConfig,
    lifecycles: LifecycleTable,
    next_generation: AtomicU64,
}

impl LifecycleManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<SessionStore>,
        registry: HandleRegistry,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            connector,
            store,
            registry,
            config,
            lifecycles: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Start a lifecycle for `account`.
    ///
    /// Status updates go to `notifier` when one is given. Fails with
    /// [`LifecycleError::AttemptInProgress`] while a lifecycle for the same
    /// account is still running.
    pub async fn connect(
        &self,
        account: AccountId,
        notifier: Option<Arc<dyn StatusNotifier>>,
    ) -> LifecycleResult<AttemptTicket> {
        let mut lifecycles = self.lifecycles.lock().await;
        if lifecycles.contains_key(&account) {
            return Err(LifecycleError::AttemptInProgress(account));
        }

        let dir = self.store.path_for(&account).await?;
        debug!(account = %account, dir = %dir.display(), "session directory ready");

        let (resolve_tx, resolve_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let driver = Driver::new(
            account.clone(),
            self.connector.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.config.clone(),
            StatusReporter::new(account.clone(), notifier),
            resolve_tx,
        );

        let table = self.lifecycles.clone();
        let task_account = account.clone();
        let task = tokio::spawn(async move {
            let exit = driver.run(cancel_rx).await;
            {
                let mut lifecycles = table.lock().await;
                if lifecycles
                    .get(&task_account)
                    .map(|entry| entry.generation == generation)
                    .unwrap_or(false)
                {
                    lifecycles.remove(&task_account);
                }
            }
            // The entry is gone before the ticket resolves
            exit.deliver();
        });

        lifecycles.insert(
            account.clone(),
            LifecycleEntry {
                generation,
                cancel: cancel_tx,
                task,
            },
        );

        Ok(AttemptTicket {
            account,
            rx: resolve_rx,
        })
    }

    /// Connect without status messages and wait for the outcome
    pub async fn resume(&self, account: AccountId) -> LifecycleResult<()> {
        self.connect(account, None).await?.resolved().await
    }

    /// Stop an account's session and erase its persisted state
    pub async fn disconnect(&self, account: &AccountId) -> LifecycleResult<()> {
        let entry = self.lifecycles.lock().await.remove(account);
        let handle = self.registry.remove(account).await;

        if entry.is_none() && handle.is_none() {
            return Err(LifecycleError::NotFound(account.clone()));
        }

        if let Some(entry) = entry {
            stop(account, entry).await;
        }
        if let Some(handle) = handle {
            handle.end().await;
        }

        self.store.delete_credentials(account).await?;
        self.store.remove_active(account).await?;
        info!(account = %account, "session disconnected and removed");
        Ok(())
    }

    /// Accounts with an open connection
    pub async fn list(&self) -> Vec<AccountId> {
        self.registry.keys().await
    }

    /// Accounts with a running lifecycle, open or not
    pub async fn running(&self) -> Vec<AccountId> {
        let mut running: Vec<AccountId> = self.lifecycles.lock().await.keys().cloned().collect();
        running.sort();
        running
    }

    /// Stop every lifecycle and end every handle. Persisted state is kept.
    pub async fn shutdown(&self) {
        let entries: Vec<(AccountId, LifecycleEntry)> =
            self.lifecycles.lock().await.drain().collect();
        let count = entries.len();

        for (account, entry) in entries {
            stop(&account, entry).await;
        }
        for (account, handle) in self.registry.drain().await {
            debug!(account = %account, "ending connection");
            handle.end().await;
        }

        info!(stopped = count, "lifecycle manager shut down");
    }
}

async fn stop(account: &AccountId, entry: LifecycleEntry) {
    // The driver may already have finished and dropped its receiver
    let _ = entry.cancel.send(());
    if let Err(e) = entry.task.await {
        warn!(account = %account, error = %e, "lifecycle task did not stop cleanly");
    }
}
