//! Store statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct StoreStats {
    reads: AtomicU64,
    commits: AtomicU64,
    bytes_written: AtomicU64,
    compactions: AtomicU64,
    recovered_bytes: AtomicU64,
    errors: AtomicU64,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, bytes: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovered(&self, bytes: u64) {
        self.recovered_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of read operations.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of commit frames written.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the total bytes appended to the log.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the number of compactions.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Returns the bytes cut from a torn log tail on open.
    pub fn recovered_bytes(&self) -> u64 {
        self.recovered_bytes.load(Ordering::Relaxed)
    }

    /// Returns the number of failed commits.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// A point-in-time view of the store: counters plus current sizes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Stored records.
    pub records: usize,
    /// Records with `synced=false`.
    pub unsynced: usize,
    /// Queued sync intents.
    pub intents: usize,
    /// Schema version.
    pub schema_version: u64,
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Total read operations.
    pub reads: u64,
    /// Commit frames written.
    pub commits: u64,
    /// Bytes appended to the log.
    pub bytes_written: u64,
    /// Compactions performed.
    pub compactions: u64,
    /// Bytes cut from a torn tail on open.
    pub recovered_bytes: u64,
    /// Failed commits.
    pub errors: u64,
}

impl StoreStats {
    pub(crate) fn fill(&self, snapshot: &mut StatsSnapshot) {
        snapshot.reads = self.reads();
        snapshot.commits = self.commits();
        snapshot.bytes_written = self.bytes_written();
        snapshot.compactions = self.compactions();
        snapshot.recovered_bytes = self.recovered_bytes();
        snapshot.errors = self.errors();
    }
}
