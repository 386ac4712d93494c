//! Entries of the durable sync-intent queue.

use crate::record::{Record, RecordId, RecordPatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Partition holding the synchronized records.
pub const RECORDS_PARTITION: &str = "records";

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    /// The record must be created on the server.
    Create,
    /// The record's fields must be pushed to the server.
    Update,
    /// The record must be deleted on the server.
    Delete,
}

impl IntentKind {
    /// Lowercase name, as persisted.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued intent as stored, with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIntent {
    /// Auto-increment sequence number, unique per store.
    pub seq: u64,
    /// Mutation kind.
    pub kind: IntentKind,
    /// Partition the target record lives in.
    pub partition: String,
    /// Fields to push (absent for deletes).
    #[serde(default)]
    pub payload: Option<RecordPatch>,
    /// Identifier of the target record, rewritten when the record is
    /// rekeyed to its canonical identifier.
    pub local_id: RecordId,
    /// When the intent was queued.
    pub timestamp: DateTime<Utc>,
    /// Failed delivery attempts so far.
    #[serde(default)]
    pub retries: u32,
    /// Key sent with create requests so a retried create is deduplicated.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// An intent before the store assigns its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIntent {
    /// Mutation kind.
    pub kind: IntentKind,
    /// Partition the target record lives in.
    pub partition: String,
    /// Fields to push.
    pub payload: Option<RecordPatch>,
    /// Target record.
    pub local_id: RecordId,
    /// Idempotency key for creates.
    pub idempotency_key: Option<String>,
}

impl NewIntent {
    /// Intent to create `record` on the server, with a fresh idempotency key.
    #[must_use]
    pub fn create(record: &Record) -> Self {
        Self::create_with_key(record, Uuid::new_v4().to_string())
    }

    /// Intent to create `record`, reusing a key already sent with an
    /// earlier attempt so the server can deduplicate.
    #[must_use]
    pub fn create_with_key(record: &Record, idempotency_key: String) -> Self {
        Self {
            kind: IntentKind::Create,
            partition: RECORDS_PARTITION.to_string(),
            payload: Some(RecordPatch::from_record(record)),
            local_id: record.id.clone(),
            idempotency_key: Some(idempotency_key),
        }
    }

    /// Intent to push `patch` for `id`.
    #[must_use]
    pub fn update(id: RecordId, patch: RecordPatch) -> Self {
        Self {
            kind: IntentKind::Update,
            partition: RECORDS_PARTITION.to_string(),
            payload: Some(patch),
            local_id: id,
            idempotency_key: None,
        }
    }

    /// Intent to delete `id` on the server.
    #[must_use]
    pub fn delete(id: RecordId) -> Self {
        Self {
            kind: IntentKind::Delete,
            partition: RECORDS_PARTITION.to_string(),
            payload: None,
            local_id: id,
            idempotency_key: None,
        }
    }

    /// Assigns the sequence number and timestamp.
    #[must_use]
    pub fn into_intent(self, seq: u64, timestamp: DateTime<Utc>) -> SyncIntent {
        SyncIntent {
            seq,
            kind: self.kind,
            partition: self.partition,
            payload: self.payload,
            local_id: self.local_id,
            timestamp,
            retries: 0,
            idempotency_key: self.idempotency_key,
        }
    }
}
