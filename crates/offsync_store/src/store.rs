//! The durable local store.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::log::{Frame, FrameType, LogWriter};
use crate::migration::{MigrationManager, MigrationVersion};
use crate::state::{Commit, Op, StoreState};
use crate::stats::{StatsSnapshot, StoreStats};
use offsync_protocol::{
    bump_timestamp, from_cbor, now, to_cbor, IntentKind, NewIntent, NewRecord, Record, RecordId,
    RecordPatch, SyncIntent,
};
use offsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// What [`LocalStore::confirm`] did with a server acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The local record matched the request and now equals the server copy.
    Synced(Record),
    /// The record changed while the request was in flight. It adopted the
    /// canonical identifier but kept its local fields and stays unsynced.
    Diverged(Record),
    /// The record was deleted while the request was in flight; a delete
    /// intent was queued for the server copy.
    Deleted,
}

impl ConfirmOutcome {
    /// The record as stored after the confirmation.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Synced(r) | Self::Diverged(r) => Some(r),
            Self::Deleted => None,
        }
    }
}

/// Log sizes around a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Log size before.
    pub bytes_before: u64,
    /// Log size after.
    pub bytes_after: u64,
}

/// Records and the sync-intent queue, persisted in a framed log.
///
/// Every mutating call appends exactly one commit frame holding all of its
/// changes, so each call is atomic across crashes. Calls are serialized
/// internally; the store is `Send + Sync` and can be shared behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use offsync_protocol::{NewRecord, RecordPatch};
/// use offsync_store::LocalStore;
///
/// let store = LocalStore::open_in_memory().unwrap();
/// let id = store.create(NewRecord::new("Buy milk")).unwrap();
/// assert!(id.is_temporary());
///
/// store.update(&id, &RecordPatch::completed(true)).unwrap();
/// assert_eq!(store.get_unsynced().len(), 1);
/// ```
pub struct LocalStore {
    state: RwLock<StoreState>,
    log: Mutex<LogWriter>,
    config: StoreConfig,
    stats: StoreStats,
    dir: Option<StoreDir>,
}

impl LocalStore {
    /// Opens (or creates) a store in `path`, taking the directory lock.
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked by another process, on I/O errors,
    /// on log corruption, or if the stored schema is newer than supported.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path.as_ref(), config.create_if_missing)?;
        let backend = FileBackend::open(&dir.log_path())?;
        Self::open_inner(Box::new(backend), config, Some(dir))
    }

    /// Opens an empty store that lives only in memory.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Opens a store over an arbitrary backend.
    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        Self::open_inner(backend, config, None)
    }

    fn open_inner(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
        dir: Option<StoreDir>,
    ) -> StoreResult<Self> {
        let (log, replay) = LogWriter::open(backend, config.sync_on_write)?;

        let mut state = StoreState::new();
        let frame_count = replay.frames.len();
        for frame in replay.frames {
            let commit: Commit = from_cbor(&frame.payload)?;
            if frame.frame_type == FrameType::Snapshot {
                state = StoreState::new();
            }
            for op in commit.ops {
                state.apply(op);
            }
        }

        let stats = StoreStats::new();
        stats.record_recovered(replay.truncated_bytes);

        let store = Self {
            state: RwLock::new(state),
            log: Mutex::new(log),
            config,
            stats,
            dir,
        };
        store.migrate()?;

        debug!(
            frames = frame_count,
            records = store.state.read().records.len(),
            "opened local store"
        );
        Ok(store)
    }

    fn migrate(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        let mut schema = state.schema.clone();
        let from = schema.version;
        let result = MigrationManager::new().run_pending(&mut schema, now())?;
        if result.changed() {
            info!(from, to = result.final_version, "migrated store schema");
            self.commit(&mut state, vec![Op::Schema(schema)])?;
        }
        Ok(())
    }

    /// Appends one commit frame and applies its ops. Must be called with the
    /// state write lock held.
    fn commit(&self, state: &mut StoreState, ops: Vec<Op>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let commit = Commit { ops };
        let frame = Frame::commit(to_cbor(&commit)?);

        let mut log = self.log.lock();
        if let Err(e) = log.append(&frame) {
            self.stats.record_error();
            return Err(e);
        }
        self.stats.record_commit(frame.encoded_len() as u64);
        state.note_changes(&commit.ops);
        for op in commit.ops {
            state.apply(op);
        }

        let threshold = self.config.compact_after_commits;
        if threshold > 0 && log.frames_since_rewrite() >= threshold {
            if let Err(e) = self.write_snapshot(state, &mut log) {
                warn!(error = %e, "automatic compaction failed");
            }
        }
        Ok(())
    }

    fn write_snapshot(&self, state: &StoreState, log: &mut LogWriter) -> StoreResult<u64> {
        let frame = Frame::snapshot(to_cbor(&Commit {
            ops: state.snapshot_ops(),
        })?);
        log.rewrite(&[frame])?;
        if let Some(dir) = &self.dir {
            dir.sync()?;
        }
        self.stats.record_compaction();
        log.size()
    }

    // === Records ===

    /// Creates a record with a fresh temporary identifier.
    ///
    /// The record starts `synced=false`, `local_only=true`, and a create
    /// intent is queued in the same commit.
    pub fn create(&self, payload: NewRecord) -> StoreResult<RecordId> {
        self.insert_local(Record::local(RecordId::temporary(), payload, now()), None)
    }

    /// Stores a record synthesized by the caller (an optimistic insert) as a
    /// new local-only record, queuing its create intent.
    ///
    /// Pass the idempotency key of a create request that may have reached
    /// the server, so the replay is deduplicated; `None` mints a fresh key.
    /// `created_at` is moved forward if needed so that local creation order
    /// is strict.
    pub fn insert_local(
        &self,
        mut record: Record,
        idempotency_key: Option<String>,
    ) -> StoreResult<RecordId> {
        record.synced = false;
        record.local_only = true;
        let id = record.id.clone();

        let mut state = self.state.write();
        if let Some(latest) = state.latest_created_at {
            if record.created_at <= latest {
                record.created_at = bump_timestamp(latest);
                record.updated_at = record.updated_at.max(record.created_at);
            }
        }
        let mut ops = state.drop_all_intents(&id);
        let intent = match idempotency_key {
            Some(key) => NewIntent::create_with_key(&record, key),
            None => NewIntent::create(&record),
        }
        .into_intent(state.next_seq, record.updated_at);
        ops.push(Op::PutRecord(record));
        ops.push(Op::PutIntent(intent));
        self.commit(&mut state, ops)?;

        debug!(%id, "created local record");
        Ok(id)
    }

    /// Returns a record by identifier.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.stats.record_read();
        self.state.read().records.get(id).cloned()
    }

    /// Returns every record, oldest first.
    #[must_use]
    pub fn get_all(&self) -> Vec<Record> {
        self.stats.record_read();
        sorted(self.state.read().records.values().cloned().collect())
    }

    /// Merges `patch` into a record, marks it unsynced and bumps
    /// `updated_at`. The record's queued push intent is refreshed, or one
    /// is queued.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the record does not exist.
    pub fn update(&self, id: &RecordId, patch: &RecordPatch) -> StoreResult<Record> {
        let mut state = self.state.write();
        let mut record = state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))?;
        record.apply_patch(patch);

        let fields = RecordPatch::from_record(&record);
        let intent = match state.push_intent_for(id).cloned() {
            Some(mut queued) => {
                queued.payload = Some(fields);
                queued.timestamp = record.updated_at;
                queued
            }
            None if record.local_only => {
                NewIntent::create(&record).into_intent(state.next_seq, record.updated_at)
            }
            None => NewIntent::update(id.clone(), fields)
                .into_intent(state.next_seq, record.updated_at),
        };

        self.commit(
            &mut state,
            vec![Op::PutRecord(record.clone()), Op::PutIntent(intent)],
        )?;
        Ok(record)
    }

    /// Removes a record and every intent queued for it.
    ///
    /// Used once the server acknowledged the deletion, or for records the
    /// server never saw.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the record does not exist.
    pub fn delete(&self, id: &RecordId) -> StoreResult<Record> {
        self.remove(id, false)
    }

    /// Removes a record while offline.
    ///
    /// If the server already knows the record, a delete intent is queued so
    /// the next sync pass removes the server copy.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the record does not exist.
    pub fn delete_offline(&self, id: &RecordId) -> StoreResult<Record> {
        self.remove(id, true)
    }

    fn remove(&self, id: &RecordId, queue_remote: bool) -> StoreResult<Record> {
        let mut state = self.state.write();
        let record = state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))?;

        let mut ops = state.drop_all_intents(id);
        ops.push(Op::DeleteRecord(id.clone()));
        if queue_remote && !record.local_only && !id.is_temporary() {
            let intent = NewIntent::delete(id.clone()).into_intent(state.next_seq, now());
            ops.push(Op::PutIntent(intent));
        }
        self.commit(&mut state, ops)?;

        debug!(%id, queued = queue_remote && !record.local_only, "deleted record");
        Ok(record)
    }

    /// Returns every record with `synced=false`, in creation order.
    #[must_use]
    pub fn get_unsynced(&self) -> Vec<Record> {
        self.stats.record_read();
        self.state.read().unsynced()
    }

    /// Marks a record acknowledged: `synced=true`, `local_only=false`, and
    /// drops its queued push intents.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the record does not exist.
    pub fn mark_synced(&self, id: &RecordId) -> StoreResult<()> {
        let mut state = self.state.write();
        let mut record = state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))?;
        record.synced = true;
        record.local_only = false;

        let mut ops = state.drop_push_intents(id);
        ops.push(Op::PutRecord(record));
        self.commit(&mut state, ops)
    }

    /// Applies a server acknowledgement for the request that carried
    /// `snapshot`.
    ///
    /// The record stored under the snapshot's identifier is replaced by
    /// `canonical`, retiring a temporary identifier. If the stored record no
    /// longer equals the snapshot, the canonical identifier is adopted but
    /// local field values are kept and the record stays unsynced.
    pub fn confirm(&self, snapshot: &Record, canonical: Record) -> StoreResult<ConfirmOutcome> {
        let mut state = self.state.write();
        let at = now();

        let Some(stored) = state.records.get(&snapshot.id).cloned() else {
            let already_queued = state
                .intents_for(&canonical.id)
                .any(|i| i.kind == IntentKind::Delete);
            if !already_queued {
                let intent = NewIntent::delete(canonical.id.clone()).into_intent(state.next_seq, at);
                self.commit(&mut state, vec![Op::PutIntent(intent)])?;
            }
            debug!(id = %canonical.id, "confirmed record was deleted locally");
            return Ok(ConfirmOutcome::Deleted);
        };

        let mut ops = state.drop_push_intents(&snapshot.id);
        if snapshot.id != canonical.id {
            ops.push(Op::DeleteRecord(snapshot.id.clone()));
        }

        if stored == *snapshot {
            let mut confirmed = canonical;
            confirmed.synced = true;
            confirmed.local_only = false;
            ops.push(Op::PutRecord(confirmed.clone()));
            self.commit(&mut state, ops)?;
            return Ok(ConfirmOutcome::Synced(confirmed));
        }

        let mut merged = stored;
        merged.id = canonical.id;
        merged.created_at = canonical.created_at;
        merged.synced = false;
        merged.local_only = false;
        let intent = NewIntent::update(merged.id.clone(), RecordPatch::from_record(&merged))
            .into_intent(state.next_seq, at);
        ops.push(Op::PutRecord(merged.clone()));
        ops.push(Op::PutIntent(intent));
        self.commit(&mut state, ops)?;

        debug!(id = %merged.id, "record changed during sync, keeping local fields");
        Ok(ConfirmOutcome::Diverged(merged))
    }

    /// Caches a full server listing for offline reads and returns the
    /// merged record set, oldest first.
    ///
    /// - Server records replace synced local copies
    /// - Unsynced local records win over the server copy
    /// - Synced local records missing from the listing are dropped
    /// - Local-only records are kept
    /// - Records with a queued delete are not resurrected
    pub fn reconcile_remote(&self, remote: Vec<Record>) -> StoreResult<Vec<Record>> {
        let token = self.change_token();
        self.reconcile_remote_since(remote, token)
    }

    /// Position in the local change history, taken before requesting a
    /// listing that is later passed to [`reconcile_remote_since`].
    ///
    /// [`reconcile_remote_since`]: Self::reconcile_remote_since
    #[must_use]
    pub fn change_token(&self) -> u64 {
        self.state.read().change_seq
    }

    /// [`reconcile_remote`](Self::reconcile_remote) for a listing requested
    /// at `token`.
    ///
    /// Records written or deleted locally after `token` are left as they
    /// are: the listing may predate a confirmation or a local delete. When
    /// the store no longer remembers that far back the listing is not
    /// applied at all.
    pub fn reconcile_remote_since(
        &self,
        remote: Vec<Record>,
        token: u64,
    ) -> StoreResult<Vec<Record>> {
        let mut state = self.state.write();
        let Some(touched) = state.changed_since(token) else {
            warn!(token, "listing is older than the change window, skipped");
            return Ok(sorted(state.records.values().cloned().collect()));
        };
        let pending_deletes: HashSet<RecordId> = state
            .intents
            .values()
            .filter(|i| i.kind == IntentKind::Delete)
            .map(|i| i.local_id.clone())
            .collect();
        let remote_ids: HashSet<RecordId> = remote.iter().map(|r| r.id.clone()).collect();

        let mut ops = Vec::new();
        for mut record in remote {
            if pending_deletes.contains(&record.id) || touched.contains(&record.id) {
                continue;
            }
            record.synced = true;
            record.local_only = false;
            match state.records.get(&record.id) {
                Some(local) if !local.synced => {}
                Some(local) if *local == record => {}
                _ => ops.push(Op::PutRecord(record)),
            }
        }
        for local in state.records.values() {
            if local.synced
                && !local.local_only
                && !remote_ids.contains(&local.id)
                && !touched.contains(&local.id)
            {
                ops.push(Op::DeleteRecord(local.id.clone()));
            }
        }

        let changes = ops.len();
        self.commit(&mut state, ops)?;
        if changes > 0 {
            debug!(changes, "reconciled server listing");
        }
        Ok(sorted(state.records.values().cloned().collect()))
    }

    /// Caches one server record returned by a successful online mutation.
    ///
    /// A local copy with unsynced changes, or a queued delete, wins over
    /// the server copy. Returns true if the record was written.
    pub fn put_remote(&self, mut record: Record) -> StoreResult<bool> {
        record.synced = true;
        record.local_only = false;

        let mut state = self.state.write();
        if state
            .intents_for(&record.id)
            .any(|i| i.kind == IntentKind::Delete)
        {
            return Ok(false);
        }
        if let Some(local) = state.records.get(&record.id) {
            if !local.synced || *local == record {
                return Ok(false);
            }
        }
        self.commit(&mut state, vec![Op::PutRecord(record)])?;
        Ok(true)
    }

    // === Sync-intent queue ===

    /// Queues an intent and returns its sequence number.
    pub fn enqueue_intent(&self, intent: NewIntent) -> StoreResult<u64> {
        let mut state = self.state.write();
        let seq = state.next_seq;
        let intent = intent.into_intent(seq, now());
        self.commit(&mut state, vec![Op::PutIntent(intent)])?;
        Ok(seq)
    }

    /// Returns every queued intent in sequence order.
    #[must_use]
    pub fn intents(&self) -> Vec<SyncIntent> {
        self.state.read().intents.values().cloned().collect()
    }

    /// Returns the intents queued for one record.
    #[must_use]
    pub fn intents_for(&self, id: &RecordId) -> Vec<SyncIntent> {
        self.state.read().intents_for(id).cloned().collect()
    }

    /// Removes an intent. Returns false if it was not queued.
    pub fn remove_intent(&self, seq: u64) -> StoreResult<bool> {
        let mut state = self.state.write();
        if !state.intents.contains_key(&seq) {
            return Ok(false);
        }
        self.commit(&mut state, vec![Op::DeleteIntent(seq)])?;
        Ok(true)
    }

    /// Removes every intent queued for a record and returns how many.
    pub fn remove_intents_for(&self, id: &RecordId) -> StoreResult<usize> {
        let mut state = self.state.write();
        let ops = state.drop_all_intents(id);
        let removed = ops.len();
        self.commit(&mut state, ops)?;
        Ok(removed)
    }

    /// Counts a failed delivery attempt and returns the new retry count.
    ///
    /// # Errors
    ///
    /// [`StoreError::IntentNotFound`] if the intent is not queued.
    pub fn record_failure(&self, seq: u64) -> StoreResult<u32> {
        let mut state = self.state.write();
        let mut intent = state
            .intents
            .get(&seq)
            .cloned()
            .ok_or(StoreError::IntentNotFound { seq })?;
        intent.retries = intent.retries.saturating_add(1);
        let retries = intent.retries;
        self.commit(&mut state, vec![Op::PutIntent(intent)])?;
        Ok(retries)
    }

    // === Schema and maintenance ===

    /// Current schema version.
    #[must_use]
    pub fn schema_version(&self) -> MigrationVersion {
        self.state.read().schema.version
    }

    /// Named partitions, sorted.
    #[must_use]
    pub fn partitions(&self) -> Vec<String> {
        self.state.read().schema.partitions.iter().cloned().collect()
    }

    /// Index names on a partition, sorted.
    #[must_use]
    pub fn indexes(&self, partition: &str) -> Vec<String> {
        self.state
            .read()
            .schema
            .indexes
            .get(partition)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Counters plus current sizes.
    pub fn stats(&self) -> StoreResult<StatsSnapshot> {
        let state = self.state.read();
        let mut snapshot = StatsSnapshot {
            records: state.records.len(),
            unsynced: state.by_synced.len(),
            intents: state.intents.len(),
            schema_version: state.schema.version,
            log_bytes: self.log.lock().size()?,
            ..StatsSnapshot::default()
        };
        self.stats.fill(&mut snapshot);
        Ok(snapshot)
    }

    /// Rewrites the log as a single snapshot frame.
    pub fn compact(&self) -> StoreResult<CompactionReport> {
        let state = self.state.read();
        let mut log = self.log.lock();
        let bytes_before = log.size()?;
        let bytes_after = self.write_snapshot(&state, &mut log)?;
        info!(bytes_before, bytes_after, "compacted store log");
        Ok(CompactionReport {
            bytes_before,
            bytes_after,
        })
    }

    /// Store directory, for file-backed stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

fn sorted(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    records
}
