//! Online/offline signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// The environment's connectivity state.
///
/// Cloning yields another handle to the same signal.
#[derive(Clone)]
pub struct Connectivity {
    inner: Arc<Inner>,
}

struct Inner {
    online: AtomicBool,
    tx: watch::Sender<bool>,
}

impl Connectivity {
    /// Creates a signal with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self {
            inner: Arc::new(Inner {
                online: AtomicBool::new(online),
                tx,
            }),
        }
    }

    /// Returns true if the network is reachable.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Updates the state. Returns true if this call changed it.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.inner.online.swap(online, Ordering::SeqCst) != online;
        if changed {
            self.inner.tx.send_replace(online);
        }
        changed
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connectivity")
            .field("online", &self.is_online())
            .finish()
    }
}
