//! # offsync protocol
//!
//! Types shared by every offsync component:
//!
//! - [`Record`] and its identifiers ([`RecordId`], temporary vs canonical)
//! - Create/update payloads ([`NewRecord`], [`RecordPatch`])
//! - The JSON wire shape of the remote collection ([`WireRecord`])
//! - Sync-intent queue entries ([`SyncIntent`])
//! - Push subscription records keyed by session ([`PushSubscription`])
//! - A CBOR codec for on-disk payloads ([`to_cbor`], [`from_cbor`])
//!
//! ## Identifier Invariants
//!
//! - Temporary identifiers carry the `temp-` prefix and are only minted
//!   on the client
//! - Canonical identifiers come from the server and never carry the prefix
//! - A retired temporary identifier is never reused

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod intent;
mod record;
mod subscription;
mod wire;

pub use codec::{from_cbor, from_json, to_cbor, to_json};
pub use error::{ProtocolError, ProtocolResult};
pub use intent::{IntentKind, NewIntent, SyncIntent, RECORDS_PARTITION};
pub use record::{bump_timestamp, now, NewRecord, Record, RecordId, RecordPatch, TEMP_ID_PREFIX};
pub use subscription::{
    NotificationPayload, PushSubscription, SessionId, SubscriptionKeys, SubscriptionRequest,
};
pub use wire::WireRecord;
