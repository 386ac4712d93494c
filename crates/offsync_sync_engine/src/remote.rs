//! Remote API abstraction for the record collection.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use offsync_protocol::{bump_timestamp, now, NewRecord, Record, RecordId, RecordPatch};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// CRUD access to the server-side record collection.
///
/// Every call returns the canonical record as stored by the server, with
/// the server-assigned identifier and timestamps.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Lists the whole collection.
    async fn list(&self) -> SyncResult<Vec<Record>>;

    /// Creates a record. The idempotency key lets the server recognise a
    /// retried create whose first response was lost.
    async fn create(&self, payload: &NewRecord, idempotency_key: Option<&str>)
        -> SyncResult<Record>;

    /// Applies a partial update to a record.
    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> SyncResult<Record>;

    /// Deletes a record.
    async fn delete(&self, id: &RecordId) -> SyncResult<()>;
}

/// The four calls of [`RemoteApi`], for counters and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteMethod {
    /// `GET /{collection}`
    List,
    /// `POST /{collection}`
    Create,
    /// `PUT /{collection}/{id}`
    Update,
    /// `DELETE /{collection}/{id}`
    Delete,
}

impl RemoteMethod {
    fn index(self) -> usize {
        match self {
            RemoteMethod::List => 0,
            RemoteMethod::Create => 1,
            RemoteMethod::Update => 2,
            RemoteMethod::Delete => 3,
        }
    }
}

impl fmt::Display for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteMethod::List => "GET",
            RemoteMethod::Create => "POST",
            RemoteMethod::Update => "PUT",
            RemoteMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// How an injected failure presents itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The server answers with this status.
    Status(u16),
    /// No response at all.
    Unreachable,
}

#[derive(Default)]
struct MemoryCollection {
    records: BTreeMap<u64, Record>,
    next_id: u64,
    idempotency: HashMap<String, RecordId>,
}

impl MemoryCollection {
    fn key(id: &RecordId) -> Option<u64> {
        id.as_str().parse().ok()
    }
}

/// An in-memory collection server for testing.
///
/// Assigns sequential integer identifiers, honours idempotency keys, counts
/// calls per method, and supports failure injection and a pause gate that
/// holds requests until released.
pub struct MemoryRemote {
    collection: Mutex<MemoryCollection>,
    failures: Mutex<HashMap<RemoteMethod, Failure>>,
    calls: [AtomicU64; 4],
    gate: watch::Sender<bool>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Creates an empty collection.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            collection: Mutex::new(MemoryCollection {
                next_id: 1,
                ..MemoryCollection::default()
            }),
            failures: Mutex::new(HashMap::new()),
            calls: Default::default(),
            gate,
        }
    }

    /// Inserts a record directly, bypassing counters and failures.
    pub fn seed(&self, payload: NewRecord) -> Record {
        self.collection.lock().insert(payload)
    }

    /// Returns the stored records in identifier order.
    pub fn records(&self) -> Vec<Record> {
        self.collection.lock().records.values().cloned().collect()
    }

    /// Returns one stored record.
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        let collection = self.collection.lock();
        MemoryCollection::key(id).and_then(|k| collection.records.get(&k).cloned())
    }

    /// Number of calls received for `method`, including failed ones.
    pub fn calls(&self, method: RemoteMethod) -> u64 {
        self.calls[method.index()].load(Ordering::SeqCst)
    }

    /// Number of calls received across all methods.
    pub fn total_calls(&self) -> u64 {
        self.calls.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    /// Makes every call to `method` fail until cleared.
    pub fn fail(&self, method: RemoteMethod, failure: Failure) {
        self.failures.lock().insert(method, failure);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Holds incoming requests until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.gate.send_replace(true);
    }

    /// Releases held requests.
    pub fn resume(&self) {
        self.gate.send_replace(false);
    }

    async fn enter(&self, method: RemoteMethod) -> SyncResult<()> {
        self.calls[method.index()].fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|paused| !paused).await;

        let failure = self.failures.lock().get(&method).copied();
        match failure {
            Some(Failure::Status(404)) => Err(SyncError::not_found(method.to_string())),
            Some(Failure::Status(status)) => {
                Err(SyncError::network(status, format!("injected {method} failure")))
            }
            Some(Failure::Unreachable) => Err(SyncError::unreachable("connection refused")),
            None => Ok(()),
        }
    }
}

impl MemoryCollection {
    fn insert(&mut self, payload: NewRecord) -> Record {
        let key = self.next_id;
        self.next_id += 1;
        let at = now();
        let record = Record {
            id: RecordId::from(key),
            title: payload.title,
            completed: payload.completed.unwrap_or(false),
            created_at: at,
            updated_at: at,
            synced: true,
            local_only: false,
        };
        self.records.insert(key, record.clone());
        record
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn list(&self) -> SyncResult<Vec<Record>> {
        self.enter(RemoteMethod::List).await?;
        Ok(self.records())
    }

    async fn create(
        &self,
        payload: &NewRecord,
        idempotency_key: Option<&str>,
    ) -> SyncResult<Record> {
        self.enter(RemoteMethod::Create).await?;
        payload.validate().map_err(|e| SyncError::network(400, e.to_string()))?;

        let mut collection = self.collection.lock();
        if let Some(key) = idempotency_key {
            let existing = collection
                .idempotency
                .get(key)
                .and_then(MemoryCollection::key)
                .and_then(|k| collection.records.get(&k).cloned());
            if let Some(record) = existing {
                return Ok(record);
            }
        }
        let record = collection.insert(payload.clone());
        if let Some(key) = idempotency_key {
            collection.idempotency.insert(key.to_string(), record.id.clone());
        }
        Ok(record)
    }

    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> SyncResult<Record> {
        self.enter(RemoteMethod::Update).await?;
        patch.validate().map_err(|e| SyncError::network(400, e.to_string()))?;

        let mut collection = self.collection.lock();
        let key = MemoryCollection::key(id).ok_or_else(|| SyncError::not_found(id.to_string()))?;
        let record = collection
            .records
            .get_mut(&key)
            .ok_or_else(|| SyncError::not_found(id.to_string()))?;
        if let Some(title) = &patch.title {
            record.title.clone_from(title);
        }
        if let Some(completed) = patch.completed {
            record.completed = completed;
        }
        record.updated_at = bump_timestamp(record.updated_at);
        Ok(record.clone())
    }

    async fn delete(&self, id: &RecordId) -> SyncResult<()> {
        self.enter(RemoteMethod::Delete).await?;
        let mut collection = self.collection.lock();
        MemoryCollection::key(id)
            .and_then(|k| collection.records.remove(&k))
            .map(|_| ())
            .ok_or_else(|| SyncError::not_found(id.to_string()))
    }
}
