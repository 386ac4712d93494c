//! # offsync store
//!
//! Durable local store for offline-first clients.
//!
//! This crate provides:
//! - Records with temporary and canonical identifiers
//! - A `by_synced` secondary index for pending changes
//! - A durable sync-intent queue
//! - Schema versioning with idempotent migrations
//! - A framed, checksummed commit log with torn-tail recovery
//!
//! ```text
//! <store_path>/
//! ├─ LOCK
//! └─ store.log
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
pub mod log;
mod migration;
mod state;
mod stats;
mod store;

pub use config::StoreConfig;
pub use dir::StoreDir;
pub use error::{StoreError, StoreResult};
pub use migration::{
    AppliedMigration, Migration, MigrationContext, MigrationManager, MigrationOperation,
    MigrationRunResult, MigrationVersion, SchemaState, BY_SYNCED_INDEX, CURRENT_SCHEMA_VERSION,
    SYNC_QUEUE_PARTITION,
};
pub use stats::{StatsSnapshot, StoreStats};
pub use store::{CompactionReport, ConfirmOutcome, LocalStore};
