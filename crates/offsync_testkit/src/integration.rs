//! Cross-crate integration test helpers.
//!
//! Provides consistency checks over a [`LocalStore`] and a harness that
//! mirrors store operations in a plain model for later verification.

use offsync_protocol::{IntentKind, NewRecord, Record, RecordId, RecordPatch};
use offsync_store::LocalStore;
use std::collections::{HashMap, HashSet};

/// Asserts the structural invariants of a store:
///
/// - The unsynced index lists exactly the records with `synced=false`,
///   in creation order
/// - A `local_only` record is never synced
/// - Every unsynced record has exactly one queued create or update
///   intent, and synced records have none
/// - Create intents belong to `local_only` records only
/// - Delete intents never target a record still present locally
/// - Intent sequence numbers are strictly increasing
pub fn assert_store_consistent(store: &LocalStore) {
    let records = store.get_all();
    let by_id: HashMap<&RecordId, &Record> = records.iter().map(|r| (&r.id, r)).collect();

    let expected_unsynced: Vec<&RecordId> =
        records.iter().filter(|r| !r.synced).map(|r| &r.id).collect();
    let unsynced = store.get_unsynced();
    let actual_unsynced: Vec<&RecordId> = unsynced.iter().map(|r| &r.id).collect();
    assert_eq!(actual_unsynced, expected_unsynced, "unsynced index out of step");

    for record in &records {
        assert!(
            !(record.local_only && record.synced),
            "local-only record {} marked synced",
            record.id
        );
    }

    let intents = store.intents();
    let mut push_intents: HashMap<&RecordId, usize> = HashMap::new();
    for intent in &intents {
        match intent.kind {
            IntentKind::Delete => assert!(
                !by_id.contains_key(&intent.local_id),
                "delete queued for live record {}",
                intent.local_id
            ),
            kind => {
                let record = by_id
                    .get(&intent.local_id)
                    .unwrap_or_else(|| panic!("{kind:?} intent for missing record {}", intent.local_id));
                assert!(!record.synced, "{kind:?} intent for synced record {}", record.id);
                assert_eq!(
                    kind == IntentKind::Create,
                    record.local_only,
                    "intent kind does not match local_only for {}",
                    record.id
                );
                *push_intents.entry(&intent.local_id).or_default() += 1;
            }
        }
    }
    for record in records.iter().filter(|r| !r.synced) {
        assert_eq!(
            push_intents.get(&record.id).copied(),
            Some(1),
            "unsynced record {} needs exactly one push intent",
            record.id
        );
    }

    let seqs: Vec<u64> = intents.iter().map(|i| i.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "intent order broken: {seqs:?}");
}

/// A test harness that mirrors store operations in a model.
pub struct StoreHarness {
    /// The store under test.
    pub store: LocalStore,
    model: HashMap<RecordId, (String, bool)>,
    deleted: HashSet<RecordId>,
}

impl StoreHarness {
    /// Creates a harness over an in-memory store.
    pub fn new() -> Self {
        Self {
            store: LocalStore::open_in_memory().expect("Failed to open store"),
            model: HashMap::new(),
            deleted: HashSet::new(),
        }
    }

    /// Creates a record and tracks it.
    pub fn create(&mut self, title: &str) -> RecordId {
        let id = self
            .store
            .create(NewRecord::new(title))
            .expect("Failed to create record");
        self.model.insert(id.clone(), (title.to_string(), false));
        id
    }

    /// Updates a record and tracks the new values.
    pub fn update(&mut self, id: &RecordId, patch: &RecordPatch) {
        let record = self.store.update(id, patch).expect("Failed to update record");
        self.model
            .insert(id.clone(), (record.title, record.completed));
    }

    /// Deletes a record offline and tracks the deletion.
    pub fn delete(&mut self, id: &RecordId) {
        self.store.delete_offline(id).expect("Failed to delete record");
        self.model.remove(id);
        self.deleted.insert(id.clone());
    }

    /// Verifies every tracked record and deletion against the store.
    pub fn verify_all(&self) {
        for (id, (title, completed)) in &self.model {
            let record = self
                .store
                .get(id)
                .unwrap_or_else(|| panic!("record {id} missing"));
            assert_eq!(&record.title, title, "title mismatch for {id}");
            assert_eq!(record.completed, *completed, "completed mismatch for {id}");
        }
        for id in &self.deleted {
            assert!(self.store.get(id).is_none(), "deleted record {id} still present");
        }
        assert_eq!(self.store.get_all().len(), self.model.len());
        assert_store_consistent(&self.store);
    }

    /// Returns the count of tracked records.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for StoreHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{scenarios, server_record};

    #[test]
    fn test_harness_basic() {
        let mut harness = StoreHarness::new();
        let a = harness.create("a");
        let b = harness.create("b");
        harness.update(&a, &RecordPatch::completed(true));
        harness.delete(&b);
        assert_eq!(harness.tracked_count(), 1);
        harness.verify_all();
    }

    #[test]
    fn test_mixed_store_is_consistent() {
        assert_store_consistent(&scenarios::mixed_store());
    }

    #[test]
    fn test_sync_round_is_consistent() {
        let (store, ids) = scenarios::offline_store(3);
        for (n, id) in ids.iter().enumerate() {
            let snapshot = store.get(id).unwrap();
            let mut canonical = server_record(n as u64 + 1, &snapshot.title, false);
            canonical.created_at = snapshot.created_at;
            store.confirm(&snapshot, canonical).unwrap();
        }
        assert!(store.get_unsynced().is_empty());
        assert!(store.intents().is_empty());
        assert!(store.get_all().iter().all(|r| !r.id.is_temporary()));
        assert_store_consistent(&store);
    }

    #[test]
    #[should_panic(expected = "unsynced record")]
    fn test_detects_missing_intent() {
        let store = LocalStore::open_in_memory().unwrap();
        let id = store.create(NewRecord::new("a")).unwrap();
        let seq = store.intents()[0].seq;
        assert_eq!(store.intents()[0].local_id, id);
        store.remove_intent(seq).unwrap();
        assert_store_consistent(&store);
    }
}
