//! Offline-first client facade.

use crate::cache::{MutationCache, MutationOutcome};
use crate::config::ClientConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::events::{ClientEvent, EventBus, EventKind};
use crate::http::HttpRemote;
use crate::remote::RemoteApi;
use crate::sync::{SyncManager, SyncOutcome, SyncTrigger};
use offsync_protocol::{IntentKind, NewRecord, Record, RecordId, RecordPatch, SyncIntent};
use offsync_store::LocalStore;
use std::sync::Arc;
use tracing::info;

/// Wires the local store, remote client, sync manager and mutation cache
/// around one connectivity signal and event bus.
///
/// # Example
///
/// ```rust
/// use offsync_sync_engine::{ClientConfig, MemoryRemote, OfflineClient};
/// use offsync_store::LocalStore;
/// use std::sync::Arc;
///
/// # tokio_test_block(async {
/// let store = Arc::new(LocalStore::open_in_memory().unwrap());
/// let client = OfflineClient::new(
///     ClientConfig::default(),
///     store,
///     Arc::new(MemoryRemote::new()),
///     false,
/// );
///
/// let outcome = client.add("Buy milk").await.unwrap();
/// assert!(outcome.is_pending());
///
/// // coming back online pushes the pending record
/// client.set_online(true).await;
/// assert!(client.pending().is_empty());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct OfflineClient {
    config: ClientConfig,
    store: Arc<LocalStore>,
    connectivity: Connectivity,
    events: Arc<EventBus>,
    sync: Arc<SyncManager>,
    cache: Arc<MutationCache>,
}

impl OfflineClient {
    /// Creates a client over an arbitrary remote.
    pub fn new(
        config: ClientConfig,
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteApi>,
        online: bool,
    ) -> Self {
        let connectivity = Connectivity::new(online);
        let events = Arc::new(EventBus::new());
        let sync = Arc::new(SyncManager::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            connectivity.clone(),
            Arc::clone(&events),
            config.sync_tag.clone(),
        ));
        let cache = Arc::new(MutationCache::new(
            Arc::clone(&store),
            remote,
            connectivity.clone(),
            Arc::clone(&events),
            config.query_key.clone(),
        ));
        invalidate_after_sync(&events, &cache);
        Self {
            config,
            store,
            connectivity,
            events,
            sync,
            cache,
        }
    }

    /// Creates a client that talks HTTP to `config.base_url`.
    pub fn with_http(config: ClientConfig, store: Arc<LocalStore>, online: bool) -> SyncResult<Self> {
        let remote = Arc::new(HttpRemote::new(config.clone())?);
        Ok(Self::new(config, store, remote, online))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Returns the connectivity signal.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Returns the event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Returns the sync manager.
    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    /// Returns the mutation cache.
    pub fn cache(&self) -> &Arc<MutationCache> {
        &self.cache
    }

    /// Feeds a connectivity change. On the offline to online transition a
    /// sync pass runs and its outcome is returned.
    pub async fn set_online(&self, online: bool) -> Option<SyncOutcome> {
        if !self.connectivity.set_online(online) {
            return None;
        }
        info!(online, "connectivity changed");
        self.events.emit(ClientEvent::ConnectivityChanged { online });
        if !online {
            return None;
        }
        Some(self.sync.run(SyncTrigger::Reconnected).await)
    }

    /// Runs a manual sync pass.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.sync.sync_now().await
    }

    /// The record list, newest first.
    pub async fn todos(&self) -> SyncResult<Vec<Record>> {
        self.cache.query(&self.config.query_key).await
    }

    /// Creates a record with the given title.
    pub async fn add(&self, title: impl Into<String>) -> SyncResult<MutationOutcome<Record>> {
        self.cache.create(NewRecord::new(title)).await
    }

    /// Flips the completion flag of a record.
    pub async fn toggle(&self, id: &RecordId) -> SyncResult<MutationOutcome<Record>> {
        let current = self.current(id)?;
        self.cache
            .update(id, RecordPatch::completed(!current.completed))
            .await
    }

    /// Changes the title of a record.
    pub async fn rename(
        &self,
        id: &RecordId,
        title: impl Into<String>,
    ) -> SyncResult<MutationOutcome<Record>> {
        self.cache.update(id, RecordPatch::title(title)).await
    }

    /// Deletes a record.
    pub async fn remove(&self, id: &RecordId) -> SyncResult<MutationOutcome<()>> {
        self.cache.delete(id).await
    }

    /// Records waiting for a sync pass, in creation order.
    pub fn pending(&self) -> Vec<Record> {
        self.store.get_unsynced()
    }

    /// Deletions waiting for a sync pass.
    pub fn pending_deletes(&self) -> Vec<SyncIntent> {
        self.store
            .intents()
            .into_iter()
            .filter(|i| i.kind == IntentKind::Delete)
            .collect()
    }

    fn current(&self, id: &RecordId) -> SyncResult<Record> {
        self.cache
            .cached(&self.config.query_key)
            .and_then(|records| records.into_iter().find(|r| r.id == *id))
            .or_else(|| self.store.get(id))
            .ok_or_else(|| SyncError::not_found(id.to_string()))
    }
}

/// Marks the cached query stale after a pass that changed the server, so
/// the next read drops retired temporary identifiers. Holds the cache weakly
/// since the cache owns the bus.
fn invalidate_after_sync(events: &EventBus, cache: &Arc<MutationCache>) {
    let cache = Arc::downgrade(cache);
    events.on(EventKind::SyncCompleted, move |event| {
        let ClientEvent::SyncCompleted(report) = event else {
            return;
        };
        if report.succeeded() == 0 {
            return;
        }
        if let Some(cache) = cache.upgrade() {
            let key = cache.query_key().to_string();
            cache.cancel_refetch(&key);
            cache.invalidate(&key);
        }
    });
}

impl std::fmt::Debug for OfflineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineClient")
            .field("base_url", &self.config.base_url)
            .field("connectivity", &self.connectivity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteMethod};
    use crate::sync::SkipReason;
    use parking_lot::Mutex;

    fn client(online: bool) -> (OfflineClient, Arc<MemoryRemote>) {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let client = OfflineClient::new(ClientConfig::default(), store, remote.clone(), online);
        (client, remote)
    }

    #[tokio::test]
    async fn reconnect_triggers_sync() {
        let (client, remote) = client(false);
        client.add("a").await.unwrap();
        client.add("b").await.unwrap();
        assert_eq!(client.pending().len(), 2);

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            client.events().on(EventKind::ConnectivityChanged, move |e| {
                seen.lock().push(e.kind());
            });
        }

        let outcome = client.set_online(true).await.unwrap();
        assert_eq!(outcome.report().unwrap().created, 2);
        assert_eq!(remote.calls(RemoteMethod::Create), 2);
        assert!(client.pending().is_empty());
        assert_eq!(seen.lock().len(), 1);

        // no transition, no pass
        assert!(client.set_online(true).await.is_none());
        assert!(client.set_online(false).await.is_none());
        assert_eq!(
            client.sync_now().await,
            SyncOutcome::Skipped(SkipReason::Offline)
        );
    }

    #[tokio::test]
    async fn toggle_flips_current_value() {
        let (client, remote) = client(true);
        let seeded = remote.seed(NewRecord::new("a"));
        client.todos().await.unwrap();

        let first = client.toggle(&seeded.id).await.unwrap().into_inner();
        assert!(first.completed);
        let second = client.toggle(&seeded.id).await.unwrap().into_inner();
        assert!(!second.completed);

        assert!(client.toggle(&RecordId::new("missing")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn offline_edits_then_reconnect() {
        let (client, remote) = client(true);
        let seeded = remote.seed(NewRecord::new("a"));
        client.todos().await.unwrap();

        client.set_online(false).await;
        client.rename(&seeded.id, "renamed").await.unwrap();
        let doomed = remote.seed(NewRecord::new("doomed"));
        client.store().reconcile_remote(remote.records()).unwrap();
        client.remove(&doomed.id).await.unwrap();
        assert_eq!(client.pending_deletes().len(), 1);

        client.set_online(true).await;
        assert_eq!(remote.get(&seeded.id).unwrap().title, "renamed");
        assert!(remote.get(&doomed.id).is_none());
        assert!(client.pending_deletes().is_empty());
    }

    #[tokio::test]
    async fn reconnect_refreshes_temporary_ids() {
        let (client, remote) = client(false);
        let added = client.add("a").await.unwrap().into_inner();
        let cached = client.todos().await.unwrap();
        assert_eq!(cached[0].id, added.id);

        let rollbacks = Arc::new(Mutex::new(0));
        {
            let rollbacks = Arc::clone(&rollbacks);
            client.events().on(EventKind::MutationRollback, move |_| {
                *rollbacks.lock() += 1;
            });
        }

        client.set_online(true).await.unwrap();
        let todos = client.todos().await.unwrap();
        assert_eq!(todos.len(), 1);
        assert!(!todos[0].id.is_temporary());
        assert!(todos[0].synced);

        let toggled = client.toggle(&todos[0].id).await.unwrap();
        assert!(!toggled.is_pending());
        assert!(remote.get(&todos[0].id).unwrap().completed);
        assert_eq!(*rollbacks.lock(), 0);
    }
}
