//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common test scenarios.

use offsync_protocol::{now, NewRecord, Record, RecordId};
use offsync_store::{LocalStore, StoreConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<LocalStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(LocalStore::open_in_memory().expect("Failed to open in-memory store")),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = LocalStore::open(Self::store_path(&temp_dir), Self::config())
            .expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(Self::store_path)
    }

    /// Closes and reopens a file-based store, as after a process restart.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores, or if another handle to the store is
    /// still alive (the directory lock would be held).
    pub fn reopen(&mut self) {
        let path = self.path().expect("Only file stores can be reopened");
        let placeholder =
            Arc::new(LocalStore::open_in_memory().expect("Failed to open in-memory store"));
        let old = std::mem::replace(&mut self.store, placeholder);
        assert_eq!(
            Arc::strong_count(&old),
            1,
            "store handle still shared; drop clones before reopening"
        );
        drop(old);
        self.store = Arc::new(LocalStore::open(path, Self::config()).expect("Failed to reopen store"));
    }

    fn store_path(dir: &TempDir) -> PathBuf {
        dir.path().join("store")
    }

    fn config() -> StoreConfig {
        StoreConfig::default().sync_on_write(false)
    }
}

impl std::ops::Deref for TestStore {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use offsync_testkit::with_temp_store;
/// use offsync_protocol::NewRecord;
///
/// with_temp_store(|store| {
///     store.create(NewRecord::new("Buy milk")).unwrap();
///     assert_eq!(store.get_unsynced().len(), 1);
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&LocalStore) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-based store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&LocalStore, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path");
    f(&test_store.store, &path)
}

/// Builds a record as the server would return it.
pub fn server_record(id: u64, title: &str, completed: bool) -> Record {
    let at = now();
    Record {
        id: RecordId::from(id),
        title: title.to_string(),
        completed,
        created_at: at,
        updated_at: at,
        synced: true,
        local_only: false,
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A store holding `count` records known to the server (ids `1..=count`).
    pub fn synced_store(count: usize) -> TestStore {
        let test_store = TestStore::memory();
        let remote = (1..=count as u64)
            .map(|i| server_record(i, &format!("todo {i}"), false))
            .collect();
        test_store
            .reconcile_remote(remote)
            .expect("Failed to seed records");
        test_store
    }

    /// A store holding `count` records created offline.
    pub fn offline_store(count: usize) -> (TestStore, Vec<RecordId>) {
        let test_store = TestStore::memory();
        let ids = (0..count)
            .map(|i| {
                test_store
                    .create(NewRecord::new(format!("offline {i}")))
                    .expect("Failed to create record")
            })
            .collect();
        (test_store, ids)
    }

    /// A store with one record in every sync state: synced, edited offline,
    /// created offline, and deleted offline (a queued delete intent).
    pub fn mixed_store() -> TestStore {
        let test_store = TestStore::memory();
        test_store
            .reconcile_remote(vec![
                server_record(1, "synced", false),
                server_record(2, "edited", false),
                server_record(3, "deleted", false),
            ])
            .expect("Failed to seed records");
        test_store
            .update(&RecordId::from(2u64), &offsync_protocol::RecordPatch::completed(true))
            .expect("Failed to edit record");
        test_store
            .create(NewRecord::new("created"))
            .expect("Failed to create record");
        test_store
            .delete_offline(&RecordId::from(3u64))
            .expect("Failed to delete record");
        test_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::IntentKind;

    #[test]
    fn test_memory_store() {
        let test_store = TestStore::memory();
        assert!(test_store.path().is_none());
        assert!(test_store.get_all().is_empty());
    }

    #[test]
    fn test_file_store_reopen() {
        let mut test_store = TestStore::file();
        let id = test_store.create(NewRecord::new("persisted")).unwrap();
        test_store.reopen();
        assert_eq!(test_store.get(&id).unwrap().title, "persisted");
    }

    #[test]
    fn test_with_file_store() {
        with_file_store(|store, path| {
            store.create(NewRecord::new("a")).unwrap();
            assert_eq!(store.path(), Some(path));
        });
    }

    #[test]
    fn test_synced_scenario() {
        let test_store = scenarios::synced_store(3);
        assert_eq!(test_store.get_all().len(), 3);
        assert!(test_store.get_unsynced().is_empty());
    }

    #[test]
    fn test_offline_scenario() {
        let (test_store, ids) = scenarios::offline_store(4);
        assert_eq!(ids.len(), 4);
        assert!(ids.iter().all(RecordId::is_temporary));
        assert_eq!(test_store.get_unsynced().len(), 4);
    }

    #[test]
    fn test_mixed_scenario() {
        let test_store = scenarios::mixed_store();
        assert_eq!(test_store.get_all().len(), 3);
        assert_eq!(test_store.get_unsynced().len(), 2);
        let deletes = test_store
            .intents()
            .into_iter()
            .filter(|i| i.kind == IntentKind::Delete)
            .count();
        assert_eq!(deletes, 1);
    }
}
