//! In-memory image of the store, rebuilt from the log on open.

use crate::migration::SchemaState;
use chrono::{DateTime, Utc};
use offsync_protocol::{IntentKind, Record, RecordId, SyncIntent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// One change inside a commit frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Op {
    PutRecord(Record),
    DeleteRecord(RecordId),
    PutIntent(SyncIntent),
    DeleteIntent(u64),
    Schema(SchemaState),
    NextSeq(u64),
}

/// Payload of a commit or snapshot frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Commit {
    pub ops: Vec<Op>,
}

/// How many recently touched record ids are remembered for
/// [`StoreState::changed_since`].
const CHANGE_WINDOW: usize = 4096;

/// Records, the `by_synced` index, the intent queue and the schema.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub records: HashMap<RecordId, Record>,
    /// Unsynced records keyed by creation order.
    pub by_synced: BTreeSet<(DateTime<Utc>, RecordId)>,
    pub intents: BTreeMap<u64, SyncIntent>,
    pub next_seq: u64,
    pub schema: SchemaState,
    /// Newest `created_at` seen, keeps local creation order strict.
    pub latest_created_at: Option<DateTime<Utc>>,
    /// Commits applied since open. Not persisted.
    pub change_seq: u64,
    /// `(change_seq, id)` for records touched by recent commits, oldest first.
    recent_changes: VecDeque<(u64, RecordId)>,
    /// Highest `change_seq` evicted from `recent_changes`.
    evicted_through: u64,
}

impl StoreState {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, op: Op) {
        match op {
            Op::PutRecord(record) => {
                self.unindex(&record.id);
                self.latest_created_at = self.latest_created_at.max(Some(record.created_at));
                if !record.synced {
                    self.by_synced.insert((record.created_at, record.id.clone()));
                }
                self.records.insert(record.id.clone(), record);
            }
            Op::DeleteRecord(id) => {
                self.unindex(&id);
                self.records.remove(&id);
            }
            Op::PutIntent(intent) => {
                self.next_seq = self.next_seq.max(intent.seq + 1);
                self.intents.insert(intent.seq, intent);
            }
            Op::DeleteIntent(seq) => {
                self.intents.remove(&seq);
            }
            Op::Schema(schema) => self.schema = schema,
            Op::NextSeq(seq) => self.next_seq = self.next_seq.max(seq),
        }
    }

    fn unindex(&mut self, id: &RecordId) {
        if let Some(old) = self.records.get(id) {
            if !old.synced {
                self.by_synced.remove(&(old.created_at, old.id.clone()));
            }
        }
    }

    /// Unsynced records in creation order, served from the index.
    pub fn unsynced(&self) -> Vec<Record> {
        self.by_synced
            .iter()
            .filter_map(|(_, id)| self.records.get(id).cloned())
            .collect()
    }

    pub fn intents_for<'a>(&'a self, id: &'a RecordId) -> impl Iterator<Item = &'a SyncIntent> + 'a {
        self.intents.values().filter(move |i| &i.local_id == id)
    }

    /// The queued create or update intent for `id`, if any.
    pub fn push_intent_for(&self, id: &RecordId) -> Option<&SyncIntent> {
        self.intents
            .values()
            .find(|i| &i.local_id == id && i.kind != IntentKind::Delete)
    }

    /// Advances `change_seq` for a live commit and remembers the record ids
    /// it puts or deletes.
    pub fn note_changes(&mut self, ops: &[Op]) {
        self.change_seq += 1;
        for op in ops {
            let id = match op {
                Op::PutRecord(record) => &record.id,
                Op::DeleteRecord(id) => id,
                _ => continue,
            };
            self.recent_changes.push_back((self.change_seq, id.clone()));
        }
        while self.recent_changes.len() > CHANGE_WINDOW {
            if let Some((seq, _)) = self.recent_changes.pop_front() {
                self.evicted_through = seq;
            }
        }
    }

    /// Record ids touched by commits after `token`, or `None` when that far
    /// back is no longer remembered.
    pub fn changed_since(&self, token: u64) -> Option<HashSet<RecordId>> {
        if self.evicted_through > token {
            return None;
        }
        Some(
            self.recent_changes
                .iter()
                .rev()
                .take_while(|(seq, _)| *seq > token)
                .map(|(_, id)| id.clone())
                .collect(),
        )
    }

    /// Ops dropping every create or update intent for `id`.
    pub fn drop_push_intents(&self, id: &RecordId) -> Vec<Op> {
        self.intents_for(id)
            .filter(|i| i.kind != IntentKind::Delete)
            .map(|i| Op::DeleteIntent(i.seq))
            .collect()
    }

    /// Ops dropping every intent for `id`.
    pub fn drop_all_intents(&self, id: &RecordId) -> Vec<Op> {
        self.intents_for(id).map(|i| Op::DeleteIntent(i.seq)).collect()
    }

    /// Full image as a single op list, used for snapshots.
    pub fn snapshot_ops(&self) -> Vec<Op> {
        let mut ops = Vec::with_capacity(self.records.len() + self.intents.len() + 2);
        ops.push(Op::Schema(self.schema.clone()));
        ops.push(Op::NextSeq(self.next_seq));
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        ops.extend(records.into_iter().map(Op::PutRecord));
        ops.extend(self.intents.values().cloned().map(Op::PutIntent));
        ops
    }
}
