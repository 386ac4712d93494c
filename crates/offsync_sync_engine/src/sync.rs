//! Synchronization manager.

use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::events::{ClientEvent, EventBus};
use crate::remote::RemoteApi;
use chrono::{DateTime, Utc};
use offsync_protocol::{now, IntentKind, Record, RecordId, RecordPatch};
use offsync_store::{ConfirmOutcome, LocalStore};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What started a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// An explicit `sync_now` call.
    Manual,
    /// The offline to online transition.
    Reconnected,
    /// A background-sync event, or its in-process fallback.
    BackgroundSync,
}

/// Why a sync request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass is in flight.
    AlreadyRunning,
    /// The connectivity signal reports offline.
    Offline,
}

/// Counts of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Local-only records created on the server.
    pub created: u64,
    /// Records whose changes were sent as updates.
    pub updated: u64,
    /// Queued deletions applied on the server.
    pub deleted: u64,
    /// Records or deletions that failed and stay queued.
    pub failed: u64,
    /// What started the pass.
    pub trigger: SyncTrigger,
    /// Duration of the pass.
    pub duration: Duration,
}

impl SyncReport {
    fn new(trigger: SyncTrigger) -> Self {
        Self {
            created: 0,
            updated: 0,
            deleted: 0,
            failed: 0,
            trigger,
            duration: Duration::ZERO,
        }
    }

    /// Number of changes that reached the server.
    pub fn succeeded(&self) -> u64 {
        self.created + self.updated + self.deleted
    }

    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Result of a sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A pass ran to the end. Individual records may still have failed.
    Completed(SyncReport),
    /// Nothing was done.
    Skipped(SkipReason),
}

impl SyncOutcome {
    /// The report, if a pass ran.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Skipped(_) => None,
        }
    }
}

/// Statistics about sync passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of passes completed.
    pub passes: u64,
    /// Total number of records created on the server.
    pub created: u64,
    /// Total number of records updated on the server.
    pub updated: u64,
    /// Total number of deletions applied on the server.
    pub deleted: u64,
    /// Total number of failed record attempts.
    pub failures: u64,
    /// Total number of skipped requests.
    pub skipped: u64,
    /// End of the last completed pass.
    pub last_sync: Option<DateTime<Utc>>,
    /// Last per-record error message.
    pub last_error: Option<String>,
}

/// A platform facility that runs sync when connectivity returns, even if
/// the application is not running.
pub trait BackgroundScheduler: Send + Sync {
    /// Registers a one-off background sync under `tag`.
    fn register(&self, tag: &str) -> SyncResult<()>;
}

/// What [`SyncManager::request_background_sync`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundRequest {
    /// Handed to the installed scheduler.
    Registered,
    /// No scheduler, or registration failed: ran in process.
    RanInProcess(SyncOutcome),
}

/// Resets the in-progress flag when a pass ends, including on panic.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Pushed {
    Created,
    Updated,
}

/// Reconciles the local store with the remote collection.
///
/// At most one pass runs at a time; a request made while a pass is in
/// flight, or while offline, returns [`SyncOutcome::Skipped`] immediately.
/// Records are pushed one by one in creation order and a failure only
/// affects its own record.
pub struct SyncManager {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteApi>,
    connectivity: Connectivity,
    events: Arc<EventBus>,
    syncing: AtomicBool,
    stats: RwLock<SyncStats>,
    scheduler: RwLock<Option<Arc<dyn BackgroundScheduler>>>,
    sync_tag: String,
}

impl SyncManager {
    /// Creates a sync manager.
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Connectivity,
        events: Arc<EventBus>,
        sync_tag: impl Into<String>,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            events,
            syncing: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
            scheduler: RwLock::new(None),
            sync_tag: sync_tag.into(),
        }
    }

    /// Returns true while a pass is in flight.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Installs a background-sync scheduler.
    pub fn set_scheduler(&self, scheduler: Arc<dyn BackgroundScheduler>) {
        *self.scheduler.write() = Some(scheduler);
    }

    /// Runs a manual sync pass.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.run(SyncTrigger::Manual).await
    }

    /// Asks the platform scheduler for a background sync, or syncs in
    /// process when none is installed or registration fails.
    pub async fn request_background_sync(&self) -> BackgroundRequest {
        let scheduler = self.scheduler.read().clone();
        if let Some(scheduler) = scheduler {
            match scheduler.register(&self.sync_tag) {
                Ok(()) => {
                    debug!(tag = %self.sync_tag, "registered background sync");
                    return BackgroundRequest::Registered;
                }
                Err(e) => warn!(error = %e, "background sync registration failed, syncing now"),
            }
        }
        BackgroundRequest::RanInProcess(self.run(SyncTrigger::BackgroundSync).await)
    }

    /// Handles a background-sync event. Events for other tags are ignored.
    pub async fn handle_background_sync(&self, tag: &str) -> Option<SyncOutcome> {
        if tag != self.sync_tag {
            debug!(tag, "ignoring background sync for another tag");
            return None;
        }
        Some(self.run(SyncTrigger::BackgroundSync).await)
    }

    /// Runs one pass.
    pub async fn run(&self, trigger: SyncTrigger) -> SyncOutcome {
        if !self.connectivity.is_online() {
            self.stats.write().skipped += 1;
            debug!(?trigger, "offline, skipping sync");
            return SyncOutcome::Skipped(SkipReason::Offline);
        }
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            self.stats.write().skipped += 1;
            debug!(?trigger, "sync already running");
            return SyncOutcome::Skipped(SkipReason::AlreadyRunning);
        };

        let start = Instant::now();
        let mut report = SyncReport::new(trigger);
        let mut last_error = None;

        for record in self.store.get_unsynced() {
            match self.push_record(&record).await {
                Ok(Pushed::Created) => report.created += 1,
                Ok(Pushed::Updated) => report.updated += 1,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "failed to sync record");
                    report.failed += 1;
                    self.note_failure(&record.id, false);
                    last_error = Some(e.to_string());
                }
            }
        }

        for intent in self.store.intents() {
            if intent.kind != IntentKind::Delete {
                continue;
            }
            match self.remote.delete(&intent.local_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(id = %intent.local_id, "already deleted on server");
                }
                Err(e) => {
                    warn!(id = %intent.local_id, error = %e, "failed to sync deletion");
                    report.failed += 1;
                    self.note_failure(&intent.local_id, true);
                    last_error = Some(e.to_string());
                    continue;
                }
            }
            match self.store.remove_intent(intent.seq) {
                Ok(_) => report.deleted += 1,
                Err(e) => {
                    warn!(seq = intent.seq, error = %e, "failed to dequeue deletion");
                    report.failed += 1;
                    last_error = Some(e.to_string());
                }
            }
        }

        report.duration = start.elapsed();
        {
            let mut stats = self.stats.write();
            stats.passes += 1;
            stats.created += report.created;
            stats.updated += report.updated;
            stats.deleted += report.deleted;
            stats.failures += report.failed;
            stats.last_sync = Some(now());
            if last_error.is_some() {
                stats.last_error = last_error;
            }
        }
        info!(
            ?trigger,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            failed = report.failed,
            "sync pass finished"
        );
        self.events.emit(ClientEvent::SyncCompleted(report.clone()));
        SyncOutcome::Completed(report)
    }

    async fn push_record(&self, record: &Record) -> SyncResult<Pushed> {
        let (canonical, pushed) = if record.local_only {
            let key = self
                .store
                .intents_for(&record.id)
                .into_iter()
                .find(|i| i.kind == IntentKind::Create)
                .and_then(|i| i.idempotency_key);
            let canonical = self
                .remote
                .create(&record.to_new_record(), key.as_deref())
                .await?;
            (canonical, Pushed::Created)
        } else {
            let canonical = self
                .remote
                .update(&record.id, &RecordPatch::from_record(record))
                .await?;
            (canonical, Pushed::Updated)
        };

        match self.store.confirm(record, canonical)? {
            ConfirmOutcome::Synced(confirmed) => {
                debug!(local = %record.id, id = %confirmed.id, "record synced");
            }
            ConfirmOutcome::Diverged(merged) => {
                debug!(id = %merged.id, "record changed during sync, queued again");
            }
            ConfirmOutcome::Deleted => {
                debug!(local = %record.id, "record deleted during sync");
            }
        }
        Ok(pushed)
    }

    /// Bumps the retry count of the push intents of `id`, or of its delete
    /// intents when `deletion` is set.
    fn note_failure(&self, id: &RecordId, deletion: bool) {
        for intent in self.store.intents_for(id) {
            if (intent.kind == IntentKind::Delete) != deletion {
                continue;
            }
            if let Err(e) = self.store.record_failure(intent.seq) {
                warn!(seq = intent.seq, error = %e, "failed to record sync failure");
            }
        }
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("syncing", &self.is_syncing())
            .field("sync_tag", &self.sync_tag)
            .finish_non_exhaustive()
    }
}

/// A scheduler that refuses every registration, forcing the in-process
/// fallback.
#[derive(Debug, Default)]
pub struct NoBackgroundSync;

impl BackgroundScheduler for NoBackgroundSync {
    fn register(&self, _tag: &str) -> SyncResult<()> {
        Err(SyncError::unreachable("background sync is not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Failure, MemoryRemote, RemoteMethod};
    use offsync_protocol::{NewIntent, NewRecord};
    use parking_lot::Mutex;

    struct Harness {
        store: Arc<LocalStore>,
        remote: Arc<MemoryRemote>,
        connectivity: Connectivity,
        events: Arc<EventBus>,
        manager: Arc<SyncManager>,
    }

    fn harness(online: bool) -> Harness {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = Arc::new(MemoryRemote::new());
        let connectivity = Connectivity::new(online);
        let events = Arc::new(EventBus::new());
        let manager = Arc::new(SyncManager::new(
            Arc::clone(&store),
            remote.clone(),
            connectivity.clone(),
            Arc::clone(&events),
            "sync-todos",
        ));
        Harness {
            store,
            remote,
            connectivity,
            events,
            manager,
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        tags: Mutex<Vec<String>>,
    }

    impl BackgroundScheduler for RecordingScheduler {
        fn register(&self, tag: &str) -> SyncResult<()> {
            self.tags.lock().push(tag.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn offline_sync_is_skipped() {
        let h = harness(false);
        h.store.create(NewRecord::new("a")).unwrap();

        let outcome = h.manager.sync_now().await;
        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::Offline));
        assert_eq!(h.remote.total_calls(), 0);
        assert_eq!(h.manager.stats().skipped, 1);
    }

    #[tokio::test]
    async fn pushes_creates_and_updates() {
        let h = harness(true);
        let temp = h.store.create(NewRecord::new("new")).unwrap();

        let existing = h.remote.seed(NewRecord::new("old"));
        h.store.reconcile_remote(vec![existing.clone()]).unwrap();
        h.store.update(&existing.id, &RecordPatch::completed(true)).unwrap();

        let outcome = h.manager.sync_now().await;
        let report = outcome.report().unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 1);
        assert!(report.is_clean());

        assert!(h.store.get(&temp).is_none());
        assert!(h.store.get_unsynced().is_empty());
        assert!(h.store.intents().is_empty());
        assert!(h.remote.get(&existing.id).unwrap().completed);
        assert_eq!(h.remote.records().len(), 2);

        let stats = h.manager.stats();
        assert_eq!(stats.passes, 1);
        assert!(stats.last_sync.is_some());
    }

    #[tokio::test]
    async fn create_reuses_queued_idempotency_key() {
        let h = harness(true);
        let record = offsync_protocol::Record::local(
            offsync_protocol::RecordId::temporary(),
            NewRecord::new("a"),
            now(),
        );
        let first = h.remote.create(&NewRecord::new("a"), Some("key-1")).await.unwrap();
        h.store.insert_local(record, Some("key-1".to_string())).unwrap();

        h.manager.sync_now().await;
        assert_eq!(h.remote.records().len(), 1);
        assert!(h.store.get(&first.id).unwrap().synced);
    }

    #[tokio::test]
    async fn failures_stay_queued() {
        let h = harness(true);
        let id = h.store.create(NewRecord::new("a")).unwrap();
        h.remote.fail(RemoteMethod::Create, Failure::Status(500));

        let outcome = h.manager.sync_now().await;
        assert_eq!(outcome.report().unwrap().failed, 1);

        let record = h.store.get(&id).unwrap();
        assert!(!record.synced);
        assert!(record.local_only);
        assert_eq!(h.store.intents_for(&id)[0].retries, 1);
        assert!(h.manager.stats().last_error.is_some());

        h.remote.clear_failures();
        let outcome = h.manager.sync_now().await;
        assert_eq!(outcome.report().unwrap().created, 1);
        assert!(h.store.get_unsynced().is_empty());
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let h = harness(true);
        let a = h.remote.seed(NewRecord::new("a"));
        h.store.reconcile_remote(vec![a.clone()]).unwrap();
        h.store.update(&a.id, &RecordPatch::title("a2")).unwrap();
        h.store.create(NewRecord::new("b")).unwrap();
        h.remote.fail(RemoteMethod::Update, Failure::Unreachable);

        let report = h.manager.sync_now().await.report().cloned().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 1);
        assert_eq!(h.store.get_unsynced().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_coalesce() {
        let h = harness(true);
        h.store.create(NewRecord::new("a")).unwrap();
        h.store.create(NewRecord::new("b")).unwrap();
        h.remote.pause();

        let first = {
            let manager = Arc::clone(&h.manager);
            tokio::spawn(async move { manager.sync_now().await })
        };
        while h.remote.calls(RemoteMethod::Create) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(h.manager.is_syncing());
        assert_eq!(
            h.manager.sync_now().await,
            SyncOutcome::Skipped(SkipReason::AlreadyRunning)
        );

        h.remote.resume();
        let report = first.await.unwrap().report().cloned().unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(h.remote.calls(RemoteMethod::Create), 2);
        assert!(!h.manager.is_syncing());
    }

    #[tokio::test]
    async fn queued_deletes_are_replayed() {
        let h = harness(true);
        let kept = h.remote.seed(NewRecord::new("server"));
        h.store.reconcile_remote(vec![kept.clone()]).unwrap();
        h.store.delete_offline(&kept.id).unwrap();
        h.store
            .enqueue_intent(NewIntent::delete(RecordId::new("404")))
            .unwrap();

        let report = h.manager.sync_now().await.report().cloned().unwrap();
        assert_eq!(report.deleted, 2);
        assert!(h.remote.records().is_empty());
        assert!(h.store.intents().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_counts_retry() {
        let h = harness(true);
        let seq = h
            .store
            .enqueue_intent(NewIntent::delete(RecordId::new("1")))
            .unwrap();
        h.remote.fail(RemoteMethod::Delete, Failure::Status(503));

        let report = h.manager.sync_now().await.report().cloned().unwrap();
        assert_eq!(report.failed, 1);
        let intents = h.store.intents();
        assert_eq!(intents[0].seq, seq);
        assert_eq!(intents[0].retries, 1);
    }

    #[tokio::test]
    async fn background_sync_uses_scheduler() {
        let h = harness(true);
        let scheduler = Arc::new(RecordingScheduler::default());
        h.manager.set_scheduler(scheduler.clone());

        assert_eq!(
            h.manager.request_background_sync().await,
            BackgroundRequest::Registered
        );
        assert_eq!(*scheduler.tags.lock(), vec!["sync-todos".to_string()]);
        assert_eq!(h.remote.total_calls(), 0);

        assert!(h.manager.handle_background_sync("other").await.is_none());
        let outcome = h.manager.handle_background_sync("sync-todos").await.unwrap();
        assert_eq!(outcome.report().unwrap().trigger, SyncTrigger::BackgroundSync);
    }

    #[tokio::test]
    async fn background_sync_falls_back_to_in_process() {
        let h = harness(true);
        h.store.create(NewRecord::new("a")).unwrap();

        let request = h.manager.request_background_sync().await;
        let BackgroundRequest::RanInProcess(outcome) = request else {
            panic!("expected in-process sync");
        };
        assert_eq!(outcome.report().unwrap().created, 1);

        h.manager.set_scheduler(Arc::new(NoBackgroundSync));
        assert!(matches!(
            h.manager.request_background_sync().await,
            BackgroundRequest::RanInProcess(_)
        ));
    }

    #[tokio::test]
    async fn completion_event_is_emitted() {
        let h = harness(true);
        let reports = Arc::new(Mutex::new(Vec::new()));
        {
            let reports = Arc::clone(&reports);
            h.events.subscribe(move |event| {
                if let ClientEvent::SyncCompleted(report) = event {
                    reports.lock().push(report.clone());
                }
            });
        }
        h.manager.sync_now().await;
        h.connectivity.set_online(false);
        h.manager.sync_now().await;

        assert_eq!(reports.lock().len(), 1);
        assert_eq!(reports.lock()[0].trigger, SyncTrigger::Manual);
    }
}
