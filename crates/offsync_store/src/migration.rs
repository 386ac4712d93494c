//! Schema versioning.
//!
//! The store keeps a schema version plus the set of named partitions and
//! indexes. Migrations run on open in version order. They are:
//! - **Forward-only**: a stored version newer than the code's is rejected
//! - **Idempotent**: creating a partition or index that exists is a no-op
//! - **Atomic**: the resulting schema is committed in a single frame

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use offsync_protocol::RECORDS_PARTITION;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version number for migrations.
pub type MigrationVersion = u64;

/// Partition holding queued sync intents.
pub const SYNC_QUEUE_PARTITION: &str = "sync_queue";

/// Secondary index over the `synced` flag of records.
pub const BY_SYNCED_INDEX: &str = "by_synced";

/// Schema version written by this code.
pub const CURRENT_SCHEMA_VERSION: MigrationVersion = 2;

/// A migration that has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Version number.
    pub version: MigrationVersion,
    /// Migration name.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// Persisted schema: version, partitions and indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaState {
    /// Current schema version (0 for a fresh store).
    pub version: MigrationVersion,
    /// Named partitions.
    pub partitions: BTreeSet<String>,
    /// Index names per partition.
    pub indexes: BTreeMap<String, BTreeSet<String>>,
    /// Applied migrations, in order.
    pub applied: Vec<AppliedMigration>,
}

impl SchemaState {
    /// Checks if a version has been applied.
    #[must_use]
    pub fn is_applied(&self, version: MigrationVersion) -> bool {
        self.applied.iter().any(|m| m.version == version)
    }

    /// Returns true if `partition` has an index called `name`.
    #[must_use]
    pub fn has_index(&self, partition: &str, name: &str) -> bool {
        self.indexes
            .get(partition)
            .is_some_and(|set| set.contains(name))
    }

    fn record(&mut self, version: MigrationVersion, name: &str, applied_at: DateTime<Utc>) {
        if !self.is_applied(version) {
            self.applied.push(AppliedMigration {
                version,
                name: name.to_string(),
                applied_at,
            });
        }
        self.version = self.version.max(version);
    }
}

/// An operation performed during a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    /// Created a partition.
    CreatePartition {
        /// Partition name.
        name: String,
    },
    /// Created an index.
    CreateIndex {
        /// Partition the index is on.
        partition: String,
        /// Index name.
        name: String,
    },
}

/// Context passed to migrations; edits the schema in place.
#[derive(Debug)]
pub struct MigrationContext<'a> {
    schema: &'a mut SchemaState,
    /// Operations that changed the schema.
    pub operations: Vec<MigrationOperation>,
}

impl<'a> MigrationContext<'a> {
    /// Creates a context over `schema`.
    pub fn new(schema: &'a mut SchemaState) -> Self {
        Self {
            schema,
            operations: Vec::new(),
        }
    }

    /// Creates a partition. Returns false if it already existed.
    pub fn create_partition(&mut self, name: &str) -> bool {
        let created = self.schema.partitions.insert(name.to_string());
        if created {
            self.operations.push(MigrationOperation::CreatePartition {
                name: name.to_string(),
            });
        }
        created
    }

    /// Creates an index on an existing partition. Returns false if it
    /// already existed.
    ///
    /// # Errors
    ///
    /// Fails if the partition does not exist.
    pub fn create_index(&mut self, partition: &str, name: &str) -> StoreResult<bool> {
        if !self.schema.partitions.contains(partition) {
            return Err(StoreError::migration_failed(format!(
                "cannot index missing partition {partition}"
            )));
        }
        let created = self
            .schema
            .indexes
            .entry(partition.to_string())
            .or_default()
            .insert(name.to_string());
        if created {
            self.operations.push(MigrationOperation::CreateIndex {
                partition: partition.to_string(),
                name: name.to_string(),
            });
        }
        Ok(created)
    }
}

/// Trait for defining migrations.
pub trait Migration: Send + Sync {
    /// Version number; unique and sequential starting from 1.
    fn version(&self) -> MigrationVersion;

    /// Name of this migration.
    fn name(&self) -> &str;

    /// Applies the migration.
    fn up(&self, ctx: &mut MigrationContext<'_>) -> StoreResult<()>;
}

/// v1: the records partition and its `by_synced` index.
struct CreateRecords;

impl Migration for CreateRecords {
    fn version(&self) -> MigrationVersion {
        1
    }

    fn name(&self) -> &str {
        "create_records"
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> StoreResult<()> {
        ctx.create_partition(RECORDS_PARTITION);
        ctx.create_index(RECORDS_PARTITION, BY_SYNCED_INDEX)?;
        Ok(())
    }
}

/// v2: the sync-intent queue.
struct CreateSyncQueue;

impl Migration for CreateSyncQueue {
    fn version(&self) -> MigrationVersion {
        2
    }

    fn name(&self) -> &str {
        "create_sync_queue"
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> StoreResult<()> {
        ctx.create_partition(SYNC_QUEUE_PARTITION);
        Ok(())
    }
}

/// Result of running pending migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRunResult {
    /// Versions applied by this run.
    pub applied: Vec<MigrationVersion>,
    /// Schema operations performed.
    pub operations: Vec<MigrationOperation>,
    /// Schema version after the run.
    pub final_version: MigrationVersion,
}

impl MigrationRunResult {
    /// Returns true if the run changed the schema.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Registered migrations, keyed by version.
pub struct MigrationManager {
    migrations: BTreeMap<MigrationVersion, Box<dyn Migration>>,
}

impl Default for MigrationManager {
    fn default() -> Self {
        let mut manager = Self::empty();
        manager.migrations.insert(1, Box::new(CreateRecords));
        manager.migrations.insert(2, Box::new(CreateSyncQueue));
        manager
    }
}

impl MigrationManager {
    /// Creates a manager with the built-in migrations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager with no migrations registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// Registers a migration.
    ///
    /// Returns an error if a migration with the same version already exists.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> StoreResult<()> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(StoreError::migration_failed(format!(
                "migration version {version} already registered"
            )));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Highest registered version.
    #[must_use]
    pub fn latest_version(&self) -> MigrationVersion {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Versions not yet applied to `schema`.
    #[must_use]
    pub fn pending(&self, schema: &SchemaState) -> Vec<MigrationVersion> {
        self.migrations
            .keys()
            .copied()
            .filter(|v| !schema.is_applied(*v))
            .collect()
    }

    /// Runs every pending migration against `schema`, in version order.
    ///
    /// # Errors
    ///
    /// Fails without touching `schema` if the stored version is newer than
    /// [`Self::latest_version`] or if a migration fails.
    pub fn run_pending(
        &self,
        schema: &mut SchemaState,
        at: DateTime<Utc>,
    ) -> StoreResult<MigrationRunResult> {
        let latest = self.latest_version();
        if schema.version > latest {
            return Err(StoreError::migration_failed(format!(
                "stored schema version {} is newer than supported version {latest}",
                schema.version
            )));
        }

        let mut working = schema.clone();
        let mut result = MigrationRunResult::default();
        for (version, migration) in &self.migrations {
            if working.is_applied(*version) {
                continue;
            }
            let mut ctx = MigrationContext::new(&mut working);
            migration.up(&mut ctx).map_err(|e| {
                StoreError::migration_failed(format!("{} (v{version}): {e}", migration.name()))
            })?;
            let operations = ctx.operations;
            result.operations.extend(operations);
            working.record(*version, migration.name(), at);
            result.applied.push(*version);
        }

        result.final_version = working.version;
        *schema = working;
        Ok(result)
    }
}
