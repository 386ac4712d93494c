//! Optimistic mutation cache.
//!
//! Holds the client's view of collection queries and applies mutations to
//! it before the server answers. Online failures restore the exact
//! pre-mutation snapshot; offline mutations are mirrored into the local
//! store and reported as pending.

use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::events::{ClientEvent, EventBus};
use crate::remote::RemoteApi;
use offsync_protocol::{now, NewRecord, Record, RecordId, RecordPatch};
use offsync_store::LocalStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A mutation applied through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// New record.
    Create,
    /// Partial update.
    Update,
    /// Deletion.
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Result of a mutation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome<T> {
    /// The server acknowledged the mutation.
    Confirmed(T),
    /// The mutation is stored locally and waits for the next sync pass.
    Pending(T),
}

impl<T> MutationOutcome<T> {
    /// Returns true if the mutation still has to reach the server.
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationOutcome::Pending(_))
    }

    /// Returns the carried value.
    pub fn into_inner(self) -> T {
        match self {
            MutationOutcome::Confirmed(value) | MutationOutcome::Pending(value) => value,
        }
    }

    /// Borrows the carried value.
    pub fn value(&self) -> &T {
        match self {
            MutationOutcome::Confirmed(value) | MutationOutcome::Pending(value) => value,
        }
    }
}

#[derive(Default)]
struct QueryEntry {
    data: Option<Vec<Record>>,
    stale: bool,
    generation: u64,
}

/// Orders records newest first.
fn newest_first(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
    records
}

/// Client-side query cache with optimistic mutations.
pub struct MutationCache {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteApi>,
    connectivity: Connectivity,
    events: Arc<EventBus>,
    queries: RwLock<HashMap<String, QueryEntry>>,
    query_key: String,
}

impl MutationCache {
    /// Creates a cache whose mutations target the query `query_key`.
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Connectivity,
        events: Arc<EventBus>,
        query_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            events,
            queries: RwLock::new(HashMap::new()),
            query_key: query_key.into(),
        }
    }

    /// Key of the query mutations apply to.
    pub fn query_key(&self) -> &str {
        &self.query_key
    }

    // === Reads ===

    /// Returns the cached records of a query, loading them on first use or
    /// after invalidation.
    pub async fn query(&self, key: &str) -> SyncResult<Vec<Record>> {
        {
            let queries = self.queries.read();
            if let Some(QueryEntry {
                data: Some(data),
                stale: false,
                ..
            }) = queries.get(key)
            {
                return Ok(data.clone());
            }
        }
        self.refetch(key).await
    }

    /// Returns the cached records without loading.
    pub fn cached(&self, key: &str) -> Option<Vec<Record>> {
        self.queries.read().get(key).and_then(|e| e.data.clone())
    }

    /// Loads a query, from the remote when online (writing the listing
    /// through to the local store) or from the local store when offline.
    ///
    /// # Errors
    ///
    /// [`SyncError::Cancelled`] if an optimistic mutation started while the
    /// listing was in flight; its result is discarded.
    pub async fn refetch(&self, key: &str) -> SyncResult<Vec<Record>> {
        let generation = self.queries.write().entry(key.to_string()).or_default().generation;

        let records = if self.connectivity.is_online() {
            let since = self.store.change_token();
            match self.remote.list().await {
                Ok(listing) => {
                    if self.generation(key) != generation {
                        debug!(key, "discarding superseded listing");
                        return Err(SyncError::Cancelled);
                    }
                    self.store.reconcile_remote_since(listing, since)?
                }
                Err(e) if !self.connectivity.is_online() => {
                    debug!(error = %e, "listing failed after going offline, reading local store");
                    self.store.get_all()
                }
                Err(e) => return Err(e),
            }
        } else {
            self.store.get_all()
        };
        let records = newest_first(records);

        let mut queries = self.queries.write();
        let entry = queries.entry(key.to_string()).or_default();
        if entry.generation != generation {
            debug!(key, "discarding superseded refetch");
            return Err(SyncError::Cancelled);
        }
        entry.data = Some(records.clone());
        entry.stale = false;
        Ok(records)
    }

    fn generation(&self, key: &str) -> u64 {
        self.queries.read().get(key).map_or(0, |e| e.generation)
    }

    /// Makes any in-flight refetch of `key` discard its result.
    pub fn cancel_refetch(&self, key: &str) {
        self.queries.write().entry(key.to_string()).or_default().generation += 1;
    }

    /// Marks a query stale so the next read reloads it.
    pub fn invalidate(&self, key: &str) {
        if let Some(entry) = self.queries.write().get_mut(key) {
            entry.stale = true;
        }
    }

    // === Mutations ===

    /// Creates a record.
    ///
    /// The record appears at the head of the query immediately under a
    /// temporary identifier. Offline, it is stored locally and returned as
    /// pending. Online, the server copy is returned once acknowledged and
    /// the query is refetched.
    pub async fn create(&self, payload: NewRecord) -> SyncResult<MutationOutcome<Record>> {
        payload.validate()?;
        let optimistic = Record::local(RecordId::temporary(), payload.clone(), now());
        let snapshot = self.apply_optimistic(|data| data.insert(0, optimistic.clone()));

        if !self.connectivity.is_online() {
            return self.create_local(optimistic, None, snapshot);
        }

        let key = Uuid::new_v4().to_string();
        match self.remote.create(&payload, Some(key.as_str())).await {
            Ok(record) => {
                self.write_through(&record);
                self.after_success().await;
                Ok(MutationOutcome::Confirmed(record))
            }
            Err(e) if !self.connectivity.is_online() => {
                debug!(error = %e, "create failed after going offline, keeping it local");
                // the request may have reached the server; replay under the same key
                self.create_local(optimistic, Some(key), snapshot)
            }
            Err(e) => {
                self.rollback(snapshot, MutationKind::Create, None, &e);
                Err(e)
            }
        }
    }

    /// Applies a partial update to a record.
    ///
    /// Records that never reached the server, or that carry local changes
    /// not yet synced, are updated locally and reported as pending even
    /// while online; the next sync pass sends their full state.
    pub async fn update(
        &self,
        id: &RecordId,
        patch: RecordPatch,
    ) -> SyncResult<MutationOutcome<Record>> {
        patch.validate()?;
        let snapshot = self.apply_optimistic(|data| {
            if let Some(record) = data.iter_mut().find(|r| r.id == *id) {
                record.apply_patch(&patch);
            }
        });

        let has_local_changes = self.store.get(id).is_some_and(|r| !r.synced);
        if !self.connectivity.is_online() || id.is_temporary() || has_local_changes {
            return self.update_local(id, &patch, snapshot);
        }

        match self.remote.update(id, &patch).await {
            Ok(record) => {
                self.write_through(&record);
                self.after_success().await;
                Ok(MutationOutcome::Confirmed(record))
            }
            Err(e) if !self.connectivity.is_online() => {
                debug!(%id, error = %e, "update failed after going offline, keeping it local");
                self.update_local(id, &patch, snapshot)
            }
            Err(e) => {
                self.rollback(snapshot, MutationKind::Update, Some(id), &e);
                Err(e)
            }
        }
    }

    /// Deletes a record.
    ///
    /// A record that does not exist, locally or on the server, yields
    /// [`SyncError::NotFound`] without a rollback: it is already gone.
    pub async fn delete(&self, id: &RecordId) -> SyncResult<MutationOutcome<()>> {
        let snapshot = self.apply_optimistic(|data| data.retain(|r| r.id != *id));

        if !self.connectivity.is_online() || id.is_temporary() {
            return self.delete_local(id, snapshot);
        }

        match self.remote.delete(id).await {
            Ok(()) => {
                self.forget_local(id);
                self.after_success().await;
                Ok(MutationOutcome::Confirmed(()))
            }
            Err(e) if e.is_not_found() => {
                debug!(%id, "record already deleted on server");
                self.forget_local(id);
                Err(e)
            }
            Err(e) if !self.connectivity.is_online() => {
                debug!(%id, error = %e, "delete failed after going offline, keeping it local");
                self.delete_local(id, snapshot)
            }
            Err(e) => {
                self.rollback(snapshot, MutationKind::Delete, Some(id), &e);
                Err(e)
            }
        }
    }

    // === Internals ===

    /// Cancels in-flight refetches, snapshots the query and applies `f` to
    /// the cached data.
    fn apply_optimistic<F>(&self, f: F) -> Option<Vec<Record>>
    where
        F: FnOnce(&mut Vec<Record>),
    {
        let mut queries = self.queries.write();
        let entry = queries.entry(self.query_key.clone()).or_default();
        entry.generation += 1;
        let snapshot = entry.data.clone();
        if let Some(data) = entry.data.as_mut() {
            f(data);
        }
        snapshot
    }

    fn restore(&self, snapshot: Option<Vec<Record>>) {
        self.queries
            .write()
            .entry(self.query_key.clone())
            .or_default()
            .data = snapshot;
    }

    fn rollback(
        &self,
        snapshot: Option<Vec<Record>>,
        kind: MutationKind,
        id: Option<&RecordId>,
        error: &SyncError,
    ) {
        warn!(%kind, id = ?id, error = %error, "mutation failed, rolling back");
        self.restore(snapshot);
        self.events.emit(ClientEvent::MutationRollback {
            query_key: self.query_key.clone(),
            kind,
            id: id.cloned(),
            error: error.to_string(),
        });
    }

    /// Replaces the cached copy of `record.id` with `record`.
    fn replace_cached(&self, record: &Record) {
        if let Some(data) = self
            .queries
            .write()
            .get_mut(&self.query_key)
            .and_then(|e| e.data.as_mut())
        {
            if let Some(slot) = data.iter_mut().find(|r| r.id == record.id) {
                *slot = record.clone();
            }
        }
    }

    fn create_local(
        &self,
        optimistic: Record,
        idempotency_key: Option<String>,
        snapshot: Option<Vec<Record>>,
    ) -> SyncResult<MutationOutcome<Record>> {
        let id = optimistic.id.clone();
        let stored = self
            .store
            .insert_local(optimistic.clone(), idempotency_key)
            .map(|_| self.store.get(&id).unwrap_or(optimistic));
        match stored {
            Ok(record) => {
                self.replace_cached(&record);
                Ok(MutationOutcome::Pending(record))
            }
            Err(e) => {
                let e = SyncError::from(e);
                self.rollback(snapshot, MutationKind::Create, Some(&id), &e);
                Err(e)
            }
        }
    }

    fn update_local(
        &self,
        id: &RecordId,
        patch: &RecordPatch,
        snapshot: Option<Vec<Record>>,
    ) -> SyncResult<MutationOutcome<Record>> {
        match self.store.update(id, patch) {
            Ok(record) => {
                self.replace_cached(&record);
                Ok(MutationOutcome::Pending(record))
            }
            Err(e) => {
                let e = SyncError::from(e);
                self.rollback(snapshot, MutationKind::Update, Some(id), &e);
                Err(e)
            }
        }
    }

    fn delete_local(
        &self,
        id: &RecordId,
        snapshot: Option<Vec<Record>>,
    ) -> SyncResult<MutationOutcome<()>> {
        match self.store.delete_offline(id) {
            Ok(_) => Ok(MutationOutcome::Pending(())),
            Err(e) if e.is_not_found() => Err(e.into()),
            Err(e) => {
                let e = SyncError::from(e);
                self.rollback(snapshot, MutationKind::Delete, Some(id), &e);
                Err(e)
            }
        }
    }

    /// Removes the local copy after the server deleted a record.
    fn forget_local(&self, id: &RecordId) {
        match self.store.delete(id) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(%id, error = %e, "failed to remove local copy"),
        }
    }

    fn write_through(&self, record: &Record) {
        if let Err(e) = self.store.put_remote(record.clone()) {
            warn!(id = %record.id, error = %e, "failed to cache server record locally");
        }
    }

    async fn after_success(&self) {
        self.invalidate(&self.query_key);
        match self.refetch(&self.query_key).await {
            Ok(_) | Err(SyncError::Cancelled) => {}
            Err(e) => warn!(error = %e, "refetch after mutation failed"),
        }
    }
}

impl fmt::Debug for MutationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCache")
            .field("query_key", &self.query_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Failure, MemoryRemote, RemoteMethod};
    use offsync_protocol::IntentKind;
    use parking_lot::Mutex;

    const KEY: &str = "todos";

    struct Harness {
        store: Arc<LocalStore>,
        remote: Arc<MemoryRemote>,
        connectivity: Connectivity,
        events: Arc<EventBus>,
        cache: Arc<MutationCache>,
    }

    fn harness(online: bool) -> Harness {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = Arc::new(MemoryRemote::new());
        let connectivity = Connectivity::new(online);
        let events = Arc::new(EventBus::new());
        let cache = Arc::new(MutationCache::new(
            Arc::clone(&store),
            remote.clone(),
            connectivity.clone(),
            Arc::clone(&events),
            KEY,
        ));
        Harness {
            store,
            remote,
            connectivity,
            events,
            cache,
        }
    }

    fn rollbacks(events: &EventBus) -> Arc<Mutex<Vec<ClientEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.on(crate::events::EventKind::MutationRollback, move |e| {
            sink.lock().push(e.clone());
        });
        seen
    }

    #[tokio::test]
    async fn query_loads_newest_first() {
        let h = harness(true);
        h.remote.seed(NewRecord::new("old"));
        h.remote.seed(NewRecord::new("new"));

        let records = h.cache.query(KEY).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].created_at >= records[1].created_at);
        assert_eq!(h.store.get_all().len(), 2);

        // second read is served from the cache
        h.cache.query(KEY).await.unwrap();
        assert_eq!(h.remote.calls(RemoteMethod::List), 1);
    }

    #[tokio::test]
    async fn offline_query_reads_store() {
        let h = harness(false);
        h.store.create(NewRecord::new("local")).unwrap();
        let records = h.cache.query(KEY).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(h.remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn offline_create_is_pending() {
        let h = harness(false);
        h.cache.query(KEY).await.unwrap();

        let outcome = h.cache.create(NewRecord::new("Buy milk")).await.unwrap();
        assert!(outcome.is_pending());
        let record = outcome.into_inner();
        assert!(record.id.is_temporary());
        assert!(!record.completed);

        let cached = h.cache.cached(KEY).unwrap();
        assert_eq!(cached, vec![record.clone()]);

        let stored = h.store.get(&record.id).unwrap();
        assert!(stored.local_only);
        assert!(!stored.synced);
        assert_eq!(h.remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn online_create_is_confirmed_and_refetched() {
        let h = harness(true);
        h.cache.query(KEY).await.unwrap();

        let outcome = h.cache.create(NewRecord::new("a")).await.unwrap();
        let MutationOutcome::Confirmed(record) = outcome else {
            panic!("expected confirmation");
        };
        assert_eq!(record.id, RecordId::new("1"));
        assert_eq!(h.cache.cached(KEY).unwrap(), vec![record.clone()]);
        assert_eq!(h.remote.calls(RemoteMethod::List), 2);
        assert!(h.store.get(&record.id).unwrap().synced);
    }

    #[tokio::test]
    async fn failed_online_create_rolls_back() {
        let h = harness(true);
        h.remote.seed(NewRecord::new("existing"));
        let before = h.cache.query(KEY).await.unwrap();
        let seen = rollbacks(&h.events);

        h.remote.fail(RemoteMethod::Create, Failure::Status(500));
        let err = h.cache.create(NewRecord::new("a")).await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(h.cache.cached(KEY).unwrap(), before);
        assert!(h.store.get_unsynced().is_empty());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(
            &seen[0],
            ClientEvent::MutationRollback { kind: MutationKind::Create, .. }
        ));
    }

    #[tokio::test]
    async fn failure_after_going_offline_is_kept_locally() {
        let h = harness(true);
        h.cache.query(KEY).await.unwrap();
        h.remote.fail(RemoteMethod::Create, Failure::Unreachable);
        h.remote.pause();

        let task = {
            let cache = Arc::clone(&h.cache);
            tokio::spawn(async move { cache.create(NewRecord::new("a")).await })
        };
        while h.remote.calls(RemoteMethod::Create) == 0 {
            tokio::task::yield_now().await;
        }
        h.connectivity.set_online(false);
        h.remote.resume();

        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.is_pending());
        let id = outcome.value().id.clone();
        let intents = h.store.intents_for(&id);
        assert_eq!(intents[0].kind, IntentKind::Create);
        assert!(intents[0].idempotency_key.is_some());
    }

    #[tokio::test]
    async fn failed_online_update_restores_snapshot() {
        let h = harness(true);
        let seeded = h.remote.seed(NewRecord::new("a"));
        let before = h.cache.query(KEY).await.unwrap();

        h.remote.fail(RemoteMethod::Update, Failure::Status(500));
        let err = h
            .cache
            .update(&seeded.id, RecordPatch::completed(true))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let after = h.cache.cached(KEY).unwrap();
        assert_eq!(after, before);
        assert!(!after[0].completed);
    }

    #[tokio::test]
    async fn temporary_records_are_updated_locally() {
        let h = harness(true);
        let id = h.store.create(NewRecord::new("a")).unwrap();
        h.cache.query(KEY).await.unwrap();

        let outcome = h.cache.update(&id, RecordPatch::title("b")).await.unwrap();
        assert!(outcome.is_pending());
        assert_eq!(h.store.get(&id).unwrap().title, "b");
        assert_eq!(h.remote.calls(RemoteMethod::Update), 0);
        assert_eq!(h.cache.cached(KEY).unwrap()[0].title, "b");
    }

    #[tokio::test]
    async fn online_update_is_written_through() {
        let h = harness(true);
        let seeded = h.remote.seed(NewRecord::new("a"));
        h.cache.query(KEY).await.unwrap();

        let outcome = h
            .cache
            .update(&seeded.id, RecordPatch::completed(true))
            .await
            .unwrap();
        assert!(!outcome.is_pending());
        assert!(h.store.get(&seeded.id).unwrap().completed);
        assert!(h.cache.cached(KEY).unwrap()[0].completed);
    }

    #[tokio::test]
    async fn delete_of_missing_record_is_not_found() {
        let h = harness(true);
        let seen = rollbacks(&h.events);
        let err = h.cache.delete(&RecordId::new("42")).await.unwrap_err();
        assert!(err.is_not_found());

        h.connectivity.set_online(false);
        let err = h.cache.delete(&RecordId::new("42")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn offline_delete_queues_remote_delete() {
        let h = harness(true);
        let seeded = h.remote.seed(NewRecord::new("a"));
        h.cache.query(KEY).await.unwrap();
        h.connectivity.set_online(false);

        let outcome = h.cache.delete(&seeded.id).await.unwrap();
        assert!(outcome.is_pending());
        assert!(h.cache.cached(KEY).unwrap().is_empty());
        assert_eq!(h.store.intents_for(&seeded.id)[0].kind, IntentKind::Delete);
        assert!(h.remote.get(&seeded.id).is_some());
    }

    #[tokio::test]
    async fn failed_online_delete_rolls_back() {
        let h = harness(true);
        let seeded = h.remote.seed(NewRecord::new("a"));
        let before = h.cache.query(KEY).await.unwrap();
        h.remote.fail(RemoteMethod::Delete, Failure::Status(503));

        h.cache.delete(&seeded.id).await.unwrap_err();
        assert_eq!(h.cache.cached(KEY).unwrap(), before);
        assert!(h.store.get(&seeded.id).is_some());
    }

    #[tokio::test]
    async fn mutation_cancels_inflight_refetch() {
        let h = harness(true);
        h.cache.query(KEY).await.unwrap();
        h.cache.invalidate(KEY);
        h.remote.pause();

        let refetch = {
            let cache = Arc::clone(&h.cache);
            tokio::spawn(async move { cache.refetch(KEY).await })
        };
        while h.remote.calls(RemoteMethod::List) < 2 {
            tokio::task::yield_now().await;
        }
        h.connectivity.set_online(false);
        h.cache.create(NewRecord::new("a")).await.unwrap();
        h.remote.resume();

        assert!(matches!(refetch.await.unwrap(), Err(SyncError::Cancelled)));
        assert_eq!(h.cache.cached(KEY).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_without_mutating() {
        let h = harness(false);
        h.cache.query(KEY).await.unwrap();
        let err = h.cache.create(NewRecord::new("   ")).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(h.cache.cached(KEY).unwrap().is_empty());
        assert!(h.store.get_all().is_empty());
    }

    /// Takes its listing from `inner` immediately, then holds the response
    /// until released.
    struct HeldListing {
        inner: Arc<MemoryRemote>,
        listed: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl RemoteApi for HeldListing {
        async fn list(&self) -> SyncResult<Vec<Record>> {
            let listing = self.inner.records();
            self.listed.notify_one();
            self.release.notified().await;
            Ok(listing)
        }

        async fn create(&self, payload: &NewRecord, key: Option<&str>) -> SyncResult<Record> {
            self.inner.create(payload, key).await
        }

        async fn update(&self, id: &RecordId, patch: &RecordPatch) -> SyncResult<Record> {
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: &RecordId) -> SyncResult<()> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn stale_listing_keeps_record_confirmed_in_flight() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let inner = Arc::new(MemoryRemote::new());
        let remote = Arc::new(HeldListing {
            inner: Arc::clone(&inner),
            listed: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let cache = Arc::new(MutationCache::new(
            Arc::clone(&store),
            remote.clone(),
            Connectivity::new(true),
            Arc::new(EventBus::new()),
            KEY,
        ));
        let temp = store.create(NewRecord::new("a")).unwrap();

        let refetch = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.refetch(KEY).await })
        };
        remote.listed.notified().await;

        // a sync pass confirms the record while the listing is in flight
        let snapshot = store.get(&temp).unwrap();
        let canonical = inner.create(&NewRecord::new("a"), None).await.unwrap();
        store.confirm(&snapshot, canonical.clone()).unwrap();
        remote.release.notify_one();

        let records = refetch.await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, canonical.id);
        assert!(store.get(&canonical.id).unwrap().synced);
        assert!(store.get(&temp).is_none());
    }
}
