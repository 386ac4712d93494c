//! Push-subscription registry.
//!
//! Subscriptions are keyed by session and persisted in the same framed log
//! the local store uses. Each change is a commit frame holding one CBOR
//! encoded put or remove; compaction rewrites the log as a single snapshot.

use crate::error::ServerResult;
use offsync_protocol::{
    from_cbor, now, to_cbor, NotificationPayload, PushSubscription, SessionId,
    SubscriptionRequest,
};
use offsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use offsync_store::log::{Frame, FrameType, LogWriter};
use offsync_store::StoreError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
enum RegistryOp {
    Put(PushSubscription),
    Remove(SessionId),
}

/// Why a notification could not be delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The push service no longer knows the endpoint.
    #[error("subscription gone ({status})")]
    Gone {
        /// Status reported by the push service (404 or 410).
        status: u16,
    },

    /// Any other delivery failure.
    #[error("delivery failed: {0}")]
    Failed(String),
}

impl DeliveryError {
    /// Returns true if the subscription should be dropped.
    pub fn is_gone(&self) -> bool {
        matches!(self, DeliveryError::Gone { .. })
    }
}

/// Delivers a notification to one push endpoint.
pub trait Notifier: Send + Sync {
    /// Sends `payload` to `subscription`.
    fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError>;
}

/// A notifier that records deliveries in memory.
///
/// Endpoints can be marked gone or failing to exercise pruning.
#[derive(Default)]
pub struct MemoryNotifier {
    delivered: Mutex<Vec<(SessionId, NotificationPayload)>>,
    gone: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes deliveries to `endpoint` report the subscription as gone.
    pub fn mark_gone(&self, endpoint: impl Into<String>) {
        self.gone.lock().push(endpoint.into());
    }

    /// Makes deliveries to `endpoint` fail transiently.
    pub fn mark_failing(&self, endpoint: impl Into<String>) {
        self.failing.lock().push(endpoint.into());
    }

    /// Notifications delivered so far.
    pub fn delivered(&self) -> Vec<(SessionId, NotificationPayload)> {
        self.delivered.lock().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        if self.gone.lock().contains(&subscription.endpoint) {
            return Err(DeliveryError::Gone { status: 410 });
        }
        if self.failing.lock().contains(&subscription.endpoint) {
            return Err(DeliveryError::Failed("push service unavailable".into()));
        }
        self.delivered
            .lock()
            .push((subscription.session_id.clone(), payload.clone()));
        Ok(())
    }
}

/// Result of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Notifications delivered.
    pub delivered: usize,
    /// Subscriptions removed (gone or expired).
    pub pruned: usize,
    /// Deliveries that failed but kept their subscription.
    pub failed: usize,
}

/// Persistent registry of push subscriptions keyed by session.
pub struct SubscriptionRegistry {
    subscriptions: RwLock<BTreeMap<SessionId, PushSubscription>>,
    writer: Mutex<LogWriter>,
}

impl SubscriptionRegistry {
    /// Opens (or creates) a file-backed registry.
    pub fn open(path: &Path, sync_on_write: bool) -> ServerResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::with_backend(Box::new(backend), sync_on_write)
    }

    /// Creates an in-memory registry.
    pub fn in_memory() -> ServerResult<Self> {
        Self::with_backend(Box::new(InMemoryBackend::new()), false)
    }

    /// Opens a registry over an arbitrary backend, replaying its log.
    pub fn with_backend(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> ServerResult<Self> {
        let (writer, replay) = LogWriter::open(backend, sync_on_write)?;
        let mut subscriptions = BTreeMap::new();
        for frame in &replay.frames {
            match frame.frame_type {
                FrameType::Snapshot => {
                    let all: Vec<PushSubscription> =
                        from_cbor(&frame.payload).map_err(StoreError::from)?;
                    subscriptions = all
                        .into_iter()
                        .map(|s| (s.session_id.clone(), s))
                        .collect();
                }
                FrameType::Commit => {
                    let op: RegistryOp = from_cbor(&frame.payload).map_err(StoreError::from)?;
                    match op {
                        RegistryOp::Put(sub) => {
                            subscriptions.insert(sub.session_id.clone(), sub);
                        }
                        RegistryOp::Remove(session) => {
                            subscriptions.remove(&session);
                        }
                    }
                }
            }
        }
        debug!(
            subscriptions = subscriptions.len(),
            truncated = replay.truncated_bytes,
            "subscription registry opened"
        );
        Ok(Self {
            subscriptions: RwLock::new(subscriptions),
            writer: Mutex::new(writer),
        })
    }

    /// Registers or refreshes the subscription of `session`.
    ///
    /// Returns the stored subscription and whether it is new.
    pub fn upsert(
        &self,
        session: SessionId,
        request: SubscriptionRequest,
    ) -> ServerResult<(PushSubscription, bool)> {
        let at = now();
        let mut subscriptions = self.subscriptions.write();
        let (subscription, created) = match subscriptions.get(&session) {
            Some(existing) => {
                let mut refreshed = existing.clone();
                refreshed.refresh(request, at);
                (refreshed, false)
            }
            None => (PushSubscription::new(session.clone(), request, at), true),
        };
        self.append(&RegistryOp::Put(subscription.clone()))?;
        subscriptions.insert(session, subscription.clone());
        Ok((subscription, created))
    }

    /// Gets the subscription of `session`.
    pub fn get(&self, session: &SessionId) -> Option<PushSubscription> {
        self.subscriptions.read().get(session).cloned()
    }

    /// All subscriptions, ordered by session.
    pub fn list(&self) -> Vec<PushSubscription> {
        self.subscriptions.read().values().cloned().collect()
    }

    /// Removes the subscription of `session`. Returns false if there was none.
    pub fn remove(&self, session: &SessionId) -> ServerResult<bool> {
        let mut subscriptions = self.subscriptions.write();
        if !subscriptions.contains_key(session) {
            return Ok(false);
        }
        self.append(&RegistryOp::Remove(session.clone()))?;
        subscriptions.remove(session);
        Ok(true)
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Returns true if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the log as one snapshot frame.
    pub fn compact(&self) -> ServerResult<()> {
        let subscriptions = self.subscriptions.read();
        let all: Vec<&PushSubscription> = subscriptions.values().collect();
        let frame = Frame::snapshot(to_cbor(&all)?);
        self.writer.lock().rewrite(&[frame])?;
        Ok(())
    }

    /// Sends `payload` to every subscription.
    ///
    /// Expired subscriptions and those the notifier reports gone are removed.
    pub fn broadcast(
        &self,
        notifier: &dyn Notifier,
        payload: &NotificationPayload,
    ) -> ServerResult<BroadcastReport> {
        let at = now();
        let mut report = BroadcastReport::default();
        let mut stale = Vec::new();

        for subscription in self.list() {
            if subscription.is_expired(at) {
                stale.push(subscription.session_id);
                continue;
            }
            match notifier.deliver(&subscription, payload) {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_gone() => {
                    debug!(session = %subscription.session_id, "pruning gone subscription");
                    stale.push(subscription.session_id);
                }
                Err(e) => {
                    warn!(session = %subscription.session_id, error = %e, "notification failed");
                    report.failed += 1;
                }
            }
        }

        for session in stale {
            if self.remove(&session)? {
                report.pruned += 1;
            }
        }
        info!(
            delivered = report.delivered,
            pruned = report.pruned,
            failed = report.failed,
            "notification broadcast"
        );
        Ok(report)
    }

    fn append(&self, op: &RegistryOp) -> ServerResult<()> {
        let frame = Frame::commit(to_cbor(op)?);
        self.writer.lock().append(&frame)?;
        Ok(())
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish_non_exhaustive()
    }
}
