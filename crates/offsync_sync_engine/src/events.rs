//! Client event dispatch.

use crate::cache::MutationKind;
use crate::sync::SyncReport;
use offsync_protocol::RecordId;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Something the client reports to the application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connectivity signal changed.
    ConnectivityChanged {
        /// New state.
        online: bool,
    },
    /// A sync pass finished.
    SyncCompleted(SyncReport),
    /// An online mutation failed and the cached query was restored.
    MutationRollback {
        /// Query that was rolled back.
        query_key: String,
        /// Mutation that failed.
        kind: MutationKind,
        /// Record the mutation targeted, if any.
        id: Option<RecordId>,
        /// Error message to show next to a retry action.
        error: String,
    },
}

/// Discriminant of [`ClientEvent`], for filtered subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ClientEvent::ConnectivityChanged`]
    ConnectivityChanged,
    /// [`ClientEvent::SyncCompleted`]
    SyncCompleted,
    /// [`ClientEvent::MutationRollback`]
    MutationRollback,
}

impl ClientEvent {
    /// Returns the event's kind.
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::ConnectivityChanged { .. } => EventKind::ConnectivityChanged,
            ClientEvent::SyncCompleted(_) => EventKind::SyncCompleted,
            ClientEvent::MutationRollback { .. } => EventKind::MutationRollback,
        }
    }
}

/// An event callback.
pub type EventHandler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    filter: Option<EventKind>,
    handler: EventHandler,
}

/// Delivers events to handlers in registration order.
///
/// Events go through a single queue. An event emitted while handlers are
/// running (including from inside a handler) is queued and delivered after
/// the current one, never recursively.
pub struct EventBus {
    handlers: RwLock<Vec<Registration>>,
    queue: Mutex<VecDeque<ClientEvent>>,
    draining: AtomicBool,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus without handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a handler for every event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Registers a handler for one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    fn register(&self, filter: Option<EventKind>, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.write().push(Registration {
            id,
            filter,
            handler,
        });
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Queues an event and delivers the queue unless a delivery is already
    /// running.
    ///
    /// A panicking handler unwinds out of this call; events still queued are
    /// delivered by the next `emit`.
    pub fn emit(&self, event: ClientEvent) {
        self.queue.lock().push_back(event);
        loop {
            let Some(guard) = DrainGuard::acquire(&self.draining) else {
                return;
            };
            self.drain();
            drop(guard);

            // An emit may have queued after the last pop but before the flag
            // was cleared.
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }

    fn drain(&self) {
        loop {
            let Some(event) = self.queue.lock().pop_front() else {
                return;
            };
            let kind = event.kind();
            let handlers: Vec<EventHandler> = self
                .handlers
                .read()
                .iter()
                .filter(|r| r.filter.is_none() || r.filter == Some(kind))
                .map(|r| Arc::clone(&r.handler))
                .collect();
            for handler in handlers {
                handler(&event);
            }
        }
    }
}

/// Clears the draining flag when delivery stops, including on panic.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connectivity(online: bool) -> ClientEvent {
        ClientEvent::ConnectivityChanged { online }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe(move |_| log.lock().push(name));
        }
        bus.emit(connectivity(true));
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn reentrant_emit_is_queued() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let bus_ref = Arc::downgrade(&bus);
            let log = Arc::clone(&log);
            bus.subscribe(move |event| {
                if let ClientEvent::ConnectivityChanged { online: true } = event {
                    if let Some(bus) = bus_ref.upgrade() {
                        bus.emit(connectivity(false));
                    }
                }
                log.lock().push(format!("a:{:?}", event.kind()));
            });
        }
        {
            let log = Arc::clone(&log);
            bus.subscribe(move |event| {
                if let ClientEvent::ConnectivityChanged { online } = event {
                    log.lock().push(format!("b:{online}"));
                }
            });
        }

        bus.emit(connectivity(true));
        assert_eq!(
            *log.lock(),
            vec![
                "a:ConnectivityChanged".to_string(),
                "b:true".to_string(),
                "a:ConnectivityChanged".to_string(),
                "b:false".to_string(),
            ]
        );
    }

    #[test]
    fn filtered_and_removed_handlers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let id = {
            let count = Arc::clone(&count);
            bus.on(EventKind::SyncCompleted, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        bus.emit(connectivity(true));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn panicking_handler_does_not_silence_the_bus() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicU64::new(0));
        {
            let delivered = Arc::clone(&delivered);
            bus.subscribe(move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.subscribe(|event| {
            if let ClientEvent::ConnectivityChanged { online: false } = event {
                panic!("handler failed");
            }
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            bus.emit(connectivity(false));
        }));
        assert!(result.is_err());
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        bus.emit(connectivity(true));
        bus.emit(connectivity(true));
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
    }
}
