//! Server-side record collection.

use crate::error::{ServerError, ServerResult};
use offsync_protocol::{bump_timestamp, now, NewRecord, RecordId, RecordPatch, WireRecord};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// The canonical record collection.
///
/// Identifiers are sequential integers rendered as strings. Creates that
/// carry an idempotency key return the record created by the first request
/// with that key.
pub struct RecordCollection {
    inner: RwLock<Inner>,
}

struct Inner {
    records: BTreeMap<u64, WireRecord>,
    next_id: u64,
    idempotency: HashMap<String, u64>,
}

impl RecordCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: BTreeMap::new(),
                next_id: 1,
                idempotency: HashMap::new(),
            }),
        }
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<WireRecord> {
        let mut records: Vec<_> = self.inner.read().records.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records
    }

    /// Gets a record by id.
    pub fn get(&self, id: &RecordId) -> Option<WireRecord> {
        let key = parse_id(id)?;
        self.inner.read().records.get(&key).cloned()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a record. Returns the record and whether it was newly
    /// created (false when an earlier request with the same key won).
    pub fn create(
        &self,
        payload: NewRecord,
        idempotency_key: Option<&str>,
    ) -> ServerResult<(WireRecord, bool)> {
        payload.validate()?;

        let mut inner = self.inner.write();
        if let Some(key) = idempotency_key {
            let existing = inner
                .idempotency
                .get(key)
                .and_then(|id| inner.records.get(id))
                .cloned();
            if let Some(record) = existing {
                return Ok((record, false));
            }
        }

        let key = inner.next_id;
        inner.next_id += 1;
        let at = now();
        let record = WireRecord {
            id: RecordId::from(key),
            title: payload.title,
            completed: payload.completed.unwrap_or(false),
            created_at: at,
            updated_at: at,
        };
        inner.records.insert(key, record.clone());
        if let Some(idempotency_key) = idempotency_key {
            inner.idempotency.insert(idempotency_key.to_string(), key);
        }
        Ok((record, true))
    }

    /// Applies a patch and bumps `updated_at`.
    pub fn update(&self, id: &RecordId, patch: &RecordPatch) -> ServerResult<WireRecord> {
        patch.validate()?;
        let key = parse_id(id).ok_or_else(|| missing(id))?;

        let mut inner = self.inner.write();
        let record = inner.records.get_mut(&key).ok_or_else(|| missing(id))?;
        if let Some(title) = &patch.title {
            record.title.clone_from(title);
        }
        if let Some(completed) = patch.completed {
            record.completed = completed;
        }
        record.updated_at = bump_timestamp(record.updated_at);
        Ok(record.clone())
    }

    /// Deletes a record.
    pub fn delete(&self, id: &RecordId) -> ServerResult<WireRecord> {
        let key = parse_id(id).ok_or_else(|| missing(id))?;
        let mut inner = self.inner.write();
        let record = inner.records.remove(&key).ok_or_else(|| missing(id))?;
        inner.idempotency.retain(|_, v| *v != key);
        Ok(record)
    }
}

impl Default for RecordCollection {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_id(id: &RecordId) -> Option<u64> {
    id.as_str().parse().ok()
}

fn missing(id: &RecordId) -> ServerError {
    ServerError::not_found(format!("record {id}"))
}
