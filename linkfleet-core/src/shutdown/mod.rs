//! Graceful shutdown coordination
//!
//! [`ShutdownCoordinator::shutdown`] flips the coordinator to `ShuttingDown`
//! and broadcasts to every subscriber. [`run_until_shutdown`] ties the
//! lifecycle manager to that broadcast.

use crate::config::ShutdownConfig;
use crate::lifecycle::LifecycleManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    shutdown_tx: broadcast::Sender<()>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// `timeout` bounds how long components get to stop
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            shutdown_tx,
            timeout,
        }
    }

    pub fn from_config(config: &ShutdownConfig) -> Self {
        Self::new(config.timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast a graceful shutdown. Repeated calls are ignored.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        if *state != ShutdownState::Running {
            warn!("Shutdown already in progress");
            return;
        }
        *state = ShutdownState::ShuttingDown;
        drop(state);

        info!("Initiating graceful shutdown");
        if self.shutdown_tx.send(()).is_err() {
            // No subscribers yet: nothing is running that needs stopping
            info!("No components subscribed to shutdown");
        }
    }

    /// Record that every component has stopped
    pub async fn mark_complete(&self) {
        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    pub async fn is_shutting_down(&self) -> bool {
        *self.state.read().await != ShutdownState::Running
    }

    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }
}

/// Block until shutdown is signalled, then stop the manager within the
/// coordinator's timeout.
pub async fn run_until_shutdown(coordinator: &ShutdownCoordinator, manager: &LifecycleManager) {
    let mut rx = coordinator.subscribe();
    if let Err(e) = rx.recv().await {
        error!("Shutdown channel error: {}", e);
    }

    if tokio::time::timeout(coordinator.timeout(), manager.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout = ?coordinator.timeout(),
            "sessions did not stop before the shutdown timeout"
        );
    }

    coordinator.mark_complete().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::registry::HandleRegistry;
    use crate::session_store::SessionStore;
    use crate::test_utils::{assert_completes_within, ScriptedConnector};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        assert_eq!(coordinator.state().await, ShutdownState::Running);

        let mut rx = coordinator.subscribe();
        coordinator.shutdown().await;
        coordinator.shutdown().await;

        assert!(rx.recv().await.is_ok());
        assert!(rx.try_recv().is_err());
        assert!(coordinator.is_shutting_down().await);
    }

    #[test]
    fn test_from_config_uses_configured_timeout() {
        let config = ShutdownConfig {
            timeout: Duration::from_secs(3),
        };
        let coordinator = ShutdownCoordinator::from_config(&config);
        assert_eq!(coordinator.timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_run_until_shutdown_stops_manager() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(
            dir.path().join("sessions"),
            dir.path().join("active.json"),
        ));
        let manager = LifecycleManager::new(
            Arc::new(ScriptedConnector::new()),
            store,
            HandleRegistry::new(),
            LifecycleConfig::default(),
        );
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(1)));

        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.shutdown().await;
        });

        assert_completes_within(
            Duration::from_secs(2),
            run_until_shutdown(&coordinator, &manager),
        )
        .await;
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }
}
