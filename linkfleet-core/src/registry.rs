//! In-memory map of live connection handles, keyed by account

use crate::account::AccountId;
use crate::protocol::ConnectionHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared identifier -> handle map. Last write wins.
#[derive(Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<RwLock<HashMap<AccountId, Arc<dyn ConnectionHandle>>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, returning the previous handle
    pub async fn put(
        &self,
        id: AccountId,
        handle: Arc<dyn ConnectionHandle>,
    ) -> Option<Arc<dyn ConnectionHandle>> {
        let previous = self.inner.write().await.insert(id, handle);
        metrics::gauge!(crate::metrics::OPEN_SESSIONS).set(self.count().await as f64);
        previous
    }

    pub async fn get(&self, id: &AccountId) -> Option<Arc<dyn ConnectionHandle>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &AccountId) -> Option<Arc<dyn ConnectionHandle>> {
        let removed = self.inner.write().await.remove(id);
        metrics::gauge!(crate::metrics::OPEN_SESSIONS).set(self.count().await as f64);
        removed
    }

    /// Remove only if the stored handle is the given one.
    ///
    /// A newer attempt may already have replaced the entry.
    pub async fn remove_if_same(&self, id: &AccountId, handle: &Arc<dyn ConnectionHandle>) -> bool {
        let mut map = self.inner.write().await;
        let same = map
            .get(id)
            .map(|current| Arc::ptr_eq(current, handle))
            .unwrap_or(false);
        if same {
            map.remove(id);
        }
        let count = map.len();
        drop(map);
        metrics::gauge!(crate::metrics::OPEN_SESSIONS).set(count as f64);
        same
    }

    pub async fn contains(&self, id: &AccountId) -> bool {
        self.inner.read().await.contains_key(id)
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Registered identifiers, sorted
    pub async fn keys(&self) -> Vec<AccountId> {
        let mut keys: Vec<AccountId> = self.inner.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether at least one sender is connected (web panel probe)
    pub async fn has_available_sender(&self) -> bool {
        !self.is_empty().await
    }

    /// Remove and return every entry
    pub async fn drain(&self) -> Vec<(AccountId, Arc<dyn ConnectionHandle>)> {
        let drained: Vec<_> = self.inner.write().await.drain().collect();
        metrics::gauge!(crate::metrics::OPEN_SESSIONS).set(0.0);
        drained
    }
}
