//! Crash recovery testing for the local store.
//!
//! Simulates crashes while the store log is written and verifies that the
//! store reopens with exactly the commits that reached storage intact.
//!
//! ## Test Strategy
//!
//! 1. **Torn tail** - every possible truncation of a log must reopen
//! 2. **Crash during append** - a partially written commit is discarded
//! 3. **Crash on flush** - the failed commit is reported to the caller
//!
//! ## Usage
//!
//! ```rust
//! use offsync_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new(5);
//! harness.run_all();
//! assert!(harness.all_passed(), "{:?}", harness.results);
//! ```

use crate::integration::assert_store_consistent;
use offsync_protocol::NewRecord;
use offsync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use offsync_store::{LocalStore, StoreConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected records after recovery.
    pub expected_records: usize,
    /// Actual records after recovery.
    pub actual_records: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a result comparing expected and actual record counts.
    pub fn check(description: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self {
            passed: expected == actual,
            description: description.into(),
            expected_records: expected,
            actual_records: actual,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: impl Into<String>, expected: usize, error: impl ToString) -> Self {
        Self {
            passed: false,
            description: description.into(),
            expected_records: expected,
            actual_records: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Crash switches shared between a [`CrashableBackend`] and the test.
#[derive(Debug, Default)]
pub struct CrashControl {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

impl CrashControl {
    /// Creates a control that never crashes.
    pub fn new() -> Arc<Self> {
        let control = Self::default();
        control.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        Arc::new(control)
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Returns whether a crash was simulated.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::other(format!("simulated crash during {what}")))
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<CrashControl>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>, control: Arc<CrashControl>) -> Self {
        Self { inner, control }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let current = self.control.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.control.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.control.crash("write"));
        }
        if current + data.len() > threshold {
            // write up to the crash point
            let partial = threshold - current;
            if partial > 0 {
                let _ = self.inner.append(&data[..partial]);
            }
            return Err(self.control.crash("partial write"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.control.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.control.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.control.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.control.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        self.inner.rewrite(data)
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Records written before each simulated crash.
    pub records: usize,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness that writes `records` records per scenario.
    pub fn new(records: usize) -> Self {
        Self {
            records,
            results: Vec::new(),
        }
    }

    /// Runs every scenario.
    pub fn run_all(&mut self) {
        self.test_torn_tail_sweep();
        self.test_crash_during_append();
        self.test_crash_on_flush();
    }

    /// Returns true if every recorded result passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    fn config() -> StoreConfig {
        StoreConfig::default().compact_after_commits(u64::MAX)
    }

    /// Writes the records and returns the log image and the log size after
    /// each commit (the first entry is the size after opening).
    fn write_log(&self) -> (Vec<u8>, Vec<usize>) {
        let backend = InMemoryBackend::new();
        let store = LocalStore::open_with_backend(Box::new(backend.clone()), Self::config())
            .expect("Failed to open store");
        let mut boundaries = vec![backend.data().len()];
        for i in 0..self.records {
            store
                .create(NewRecord::new(format!("record {i}")))
                .expect("Failed to create record");
            boundaries.push(backend.data().len());
        }
        (backend.data(), boundaries)
    }

    /// Reopens every truncation of a log and checks that exactly the
    /// commits wholly inside the cut survive.
    pub fn test_torn_tail_sweep(&mut self) {
        let (data, boundaries) = self.write_log();
        for cut in 0..=data.len() {
            let expected = boundaries[1..].iter().filter(|b| **b <= cut).count();
            let description = format!("torn tail at byte {cut}");
            let backend = InMemoryBackend::with_data(data[..cut].to_vec());
            let result = match LocalStore::open_with_backend(Box::new(backend), Self::config()) {
                Ok(store) => {
                    assert_store_consistent(&store);
                    CrashRecoveryResult::check(description, expected, store.get_all().len())
                }
                Err(e) => CrashRecoveryResult::fail(description, expected, e),
            };
            self.results.push(result);
        }
    }

    /// Crashes in the middle of the last commit and reopens.
    pub fn test_crash_during_append(&mut self) {
        let inner = InMemoryBackend::new();
        let control = CrashControl::new();
        let backend = CrashableBackend::new(Box::new(inner.clone()), Arc::clone(&control));
        let store = LocalStore::open_with_backend(Box::new(backend), Self::config())
            .expect("Failed to open store");
        for i in 0..self.records {
            store
                .create(NewRecord::new(format!("record {i}")))
                .expect("Failed to create record");
        }

        control.crash_after(7);
        let failed = store.create(NewRecord::new("lost"));
        drop(store);

        let description = "crash during append";
        if failed.is_ok() || !control.has_crashed() {
            self.results.push(CrashRecoveryResult::fail(
                description,
                self.records,
                "append did not fail",
            ));
            return;
        }
        let result = match LocalStore::open_with_backend(Box::new(inner), Self::config()) {
            Ok(store) => {
                let recovered = store.stats().map(|s| s.recovered_bytes).unwrap_or(0);
                let mut result =
                    CrashRecoveryResult::check(description, self.records, store.get_all().len());
                if recovered == 0 {
                    result.passed = false;
                    result.error = Some("torn tail was not truncated".into());
                }
                result
            }
            Err(e) => CrashRecoveryResult::fail(description, self.records, e),
        };
        self.results.push(result);
    }

    /// Fails the flush of the last commit; the caller must see the error.
    pub fn test_crash_on_flush(&mut self) {
        let control = CrashControl::new();
        let backend = CrashableBackend::new(Box::new(InMemoryBackend::new()), Arc::clone(&control));
        let store = LocalStore::open_with_backend(Box::new(backend), Self::config())
            .expect("Failed to open store");
        for i in 0..self.records {
            store
                .create(NewRecord::new(format!("record {i}")))
                .expect("Failed to create record");
        }
        control.set_fail_on_flush(true);
        let failed = store.create(NewRecord::new("unflushed"));

        let description = "crash on flush";
        let result = if failed.is_err() && control.has_crashed() {
            CrashRecoveryResult::check(description, self.records, store.get_all().len())
        } else {
            CrashRecoveryResult::fail(description, self.records, "flush failure was swallowed")
        };
        self.results.push(result);
    }
}
