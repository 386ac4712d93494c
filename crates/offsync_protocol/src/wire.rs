//! JSON shape of a record as exchanged with the remote collection.

use crate::record::{Record, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record as sent and returned by the remote REST collection.
///
/// The wire form carries no sync flags; they are local bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    /// Canonical server identifier.
    pub id: RecordId,
    /// Text payload.
    pub title: String,
    /// Completion flag.
    #[serde(default)]
    pub completed: bool,
    /// Server creation time.
    pub created_at: DateTime<Utc>,
    /// Server modification time.
    pub updated_at: DateTime<Utc>,
}

impl WireRecord {
    /// Converts a server record into the local model. The result is
    /// acknowledged by definition: `synced=true`, `local_only=false`.
    #[must_use]
    pub fn into_record(self) -> Record {
        Record {
            id: self.id,
            title: self.title,
            completed: self.completed,
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced: true,
            local_only: false,
        }
    }
}

impl From<&Record> for WireRecord {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            completed: record.completed,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl From<WireRecord> for Record {
    fn from(wire: WireRecord) -> Self {
        wire.into_record()
    }
}
