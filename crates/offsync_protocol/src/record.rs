//! The synchronized record and its payloads.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, SubsecRound, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix that tags client-minted temporary identifiers.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Maximum title length accepted by [`NewRecord::validate`].
const MAX_TITLE_CHARS: usize = 500;

/// Current time, truncated to millisecond precision.
///
/// Timestamps are kept at millisecond precision so that a record
/// round-tripped through JSON compares equal to the original.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Returns a timestamp strictly later than `previous`.
///
/// Uses the wall clock when it has moved past `previous`, otherwise
/// `previous + 1ms`.
#[must_use]
pub fn bump_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let current = now();
    if current > previous {
        current
    } else {
        previous + chrono::Duration::milliseconds(1)
    }
}

/// Identifier of a record.
///
/// Either a temporary client identifier (`temp-<uuid>`) or a canonical
/// server identifier. On the wire the server may send the canonical form as
/// a JSON string or integer; it is always held and re-sent as a string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wraps a canonical or temporary identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh temporary identifier.
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()))
    }

    /// Returns true for client-minted temporary identifiers.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl FromStr for RecordId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::invalid_payload("record id must not be empty"));
        }
        Ok(Self::new(trimmed))
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = RecordId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer record id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RecordId, E> {
                Ok(RecordId::new(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<RecordId, E> {
                Ok(RecordId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RecordId, E> {
                Ok(RecordId::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RecordId, E> {
                Ok(RecordId(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// A synchronized record (a todo item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Temporary or canonical identifier.
    pub id: RecordId,
    /// Text payload.
    pub title: String,
    /// Completion flag.
    pub completed: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// True once the server acknowledged the current local state.
    pub synced: bool,
    /// True for records that never reached the server.
    pub local_only: bool,
}

impl Record {
    /// Builds a record created on this device: unsynced and local-only.
    #[must_use]
    pub fn local(id: RecordId, payload: NewRecord, at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: payload.title,
            completed: payload.completed.unwrap_or(false),
            created_at: at,
            updated_at: at,
            synced: false,
            local_only: true,
        }
    }

    /// Applies a partial update, marking the record unsynced and bumping
    /// `updated_at`.
    pub fn apply_patch(&mut self, patch: &RecordPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        self.updated_at = bump_timestamp(self.updated_at);
        self.synced = false;
    }

    /// Returns true while local changes await server acknowledgement.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.synced
    }

    /// The create payload that reproduces this record on the server.
    #[must_use]
    pub fn to_new_record(&self) -> NewRecord {
        NewRecord {
            title: self.title.clone(),
            completed: Some(self.completed),
        }
    }
}

/// Payload of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Title of the new record.
    pub title: String,
    /// Initial completion flag (defaults to false).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl NewRecord {
    /// Creates a payload with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            completed: None,
        }
    }

    /// Sets the initial completion flag.
    #[must_use]
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    /// Checks field rules: the title must contain non-whitespace text and
    /// stay under the length limit.
    pub fn validate(&self) -> ProtocolResult<()> {
        validate_title(&self.title)
    }
}

/// Payload of an update request; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New completion flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl RecordPatch {
    /// A patch that sets only the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            completed: None,
        }
    }

    /// A patch that sets only the completion flag.
    #[must_use]
    pub fn completed(completed: bool) -> Self {
        Self {
            title: None,
            completed: Some(completed),
        }
    }

    /// A patch carrying the full mutable state of `record`.
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            title: Some(record.title.clone()),
            completed: Some(record.completed),
        }
    }

    /// Returns true when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.completed.is_none()
    }

    /// Checks field rules for the fields that are present.
    pub fn validate(&self) -> ProtocolResult<()> {
        match &self.title {
            Some(title) => validate_title(title),
            None => Ok(()),
        }
    }
}

fn validate_title(title: &str) -> ProtocolResult<()> {
    if title.trim().is_empty() {
        return Err(ProtocolError::invalid_payload("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ProtocolError::invalid_payload(format!(
            "title longer than {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_ids_are_tagged_and_unique() {
        let a = RecordId::temporary();
        let b = RecordId::temporary();
        assert!(a.is_temporary());
        assert!(a.as_str().starts_with(TEMP_ID_PREFIX));
        assert_ne!(a, b);
        assert!(!RecordId::new("42").is_temporary());
    }

    #[test]
    fn id_accepts_json_integers() {
        let id: RecordId = serde_json::from_str("17").unwrap();
        assert_eq!(id, RecordId::new("17"));
        let id: RecordId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
        assert_eq!(serde_json::to_string(&RecordId::from(9u64)).unwrap(), "\"9\"");
    }

    #[test]
    fn id_from_str_rejects_blank() {
        assert!("  ".parse::<RecordId>().is_err());
        assert_eq!(" 7 ".parse::<RecordId>().unwrap(), RecordId::new("7"));
    }

    #[test]
    fn local_record_starts_pending() {
        let record = Record::local(RecordId::temporary(), NewRecord::new("Buy milk"), now());
        assert!(!record.completed);
        assert!(!record.synced);
        assert!(record.local_only);
        assert!(record.is_pending());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn patch_marks_unsynced_and_bumps_time() {
        let mut record = Record::local(RecordId::new("1"), NewRecord::new("a"), now());
        record.synced = true;
        let before = record.updated_at;

        record.apply_patch(&RecordPatch::completed(true));
        assert!(record.completed);
        assert_eq!(record.title, "a");
        assert!(!record.synced);
        assert!(record.updated_at > before);
    }

    #[test]
    fn bump_is_strictly_monotonic() {
        let future = now() + chrono::Duration::seconds(60);
        assert!(bump_timestamp(future) > future);
    }

    #[test]
    fn title_rules() {
        assert!(NewRecord::new("ok").validate().is_ok());
        assert!(NewRecord::new("   ").validate().is_err());
        assert!(NewRecord::new("x".repeat(501)).validate().is_err());
        assert!(RecordPatch::completed(true).validate().is_ok());
        assert!(RecordPatch::title("").validate().is_err());
    }

    #[test]
    fn payload_json_shape() {
        let json = serde_json::to_value(NewRecord::new("Buy milk")).unwrap();
        assert_eq!(json, serde_json::json!({ "title": "Buy milk" }));

        let json = serde_json::to_value(RecordPatch::completed(true)).unwrap();
        assert_eq!(json, serde_json::json!({ "completed": true }));
        assert!(RecordPatch::default().is_empty());
    }
}

#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn record_json_roundtrip_preserves_fields(
            title in "[a-zA-Z0-9 ]{1,40}",
            completed in any::<bool>(),
            id in 0u64..1_000_000,
        ) {
            let mut record = Record::local(
                RecordId::from(id),
                NewRecord::new(title).with_completed(completed),
                now(),
            );
            record.synced = true;
            let json = serde_json::to_vec(&record).unwrap();
            let back: Record = serde_json::from_slice(&json).unwrap();
            prop_assert_eq!(back, record);
        }

        #[test]
        fn patch_never_moves_updated_at_backwards(offset_ms in -5_000i64..5_000) {
            let base = now() + chrono::Duration::milliseconds(offset_ms);
            let mut record = Record::local(RecordId::temporary(), NewRecord::new("t"), base);
            record.apply_patch(&RecordPatch::default());
            prop_assert!(record.updated_at > base);
        }
    }
}
