//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use offsync_protocol::{NewRecord, RecordId, RecordPatch};
use offsync_store::{LocalStore, StoreResult};
use proptest::prelude::*;

/// Strategy for generating valid titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9][a-zA-Z0-9 ,.!?-]{0,39}").expect("Invalid regex")
}

/// Strategy for generating create payloads.
pub fn new_record_strategy() -> impl Strategy<Value = NewRecord> {
    (title_strategy(), prop::option::of(any::<bool>())).prop_map(|(title, completed)| NewRecord {
        title,
        completed,
    })
}

/// Strategy for generating non-empty update payloads.
pub fn patch_strategy() -> impl Strategy<Value = RecordPatch> {
    (prop::option::of(title_strategy()), prop::option::of(any::<bool>()))
        .prop_filter("Patch must change something", |(t, c)| t.is_some() || c.is_some())
        .prop_map(|(title, completed)| RecordPatch { title, completed })
}

/// One operation against a local store.
///
/// Targets are indexes into the records existing when the operation runs,
/// taken modulo their count, so every generated sequence is applicable.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Create a record offline.
    Create(NewRecord),
    /// Update an existing record.
    Update {
        /// Index of the target record.
        target: usize,
        /// Patch to apply.
        patch: RecordPatch,
    },
    /// Delete an existing record offline.
    Delete {
        /// Index of the target record.
        target: usize,
    },
    /// Acknowledge an existing record as synced.
    MarkSynced {
        /// Index of the target record.
        target: usize,
    },
}

/// Strategy for generating a single store operation.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        3 => new_record_strategy().prop_map(StoreOperation::Create),
        2 => (any::<usize>(), patch_strategy())
            .prop_map(|(target, patch)| StoreOperation::Update { target, patch }),
        1 => any::<usize>().prop_map(|target| StoreOperation::Delete { target }),
        1 => any::<usize>().prop_map(|target| StoreOperation::MarkSynced { target }),
    ]
}

/// Strategy for generating a sequence of store operations.
pub fn store_operations_strategy(max_len: usize) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), 0..max_len)
}

/// Applies an operation. Operations on an empty store are no-ops.
pub fn apply_operation(store: &LocalStore, op: &StoreOperation) -> StoreResult<()> {
    let records = store.get_all();
    let pick = |target: usize| -> Option<RecordId> {
        if records.is_empty() {
            None
        } else {
            Some(records[target % records.len()].id.clone())
        }
    };

    match op {
        StoreOperation::Create(payload) => {
            store.create(payload.clone())?;
        }
        StoreOperation::Update { target, patch } => {
            if let Some(id) = pick(*target) {
                store.update(&id, patch)?;
            }
        }
        StoreOperation::Delete { target } => {
            if let Some(id) = pick(*target) {
                store.delete_offline(&id)?;
            }
        }
        StoreOperation::MarkSynced { target } => {
            if let Some(id) = pick(*target) {
                store.mark_synced(&id)?;
            }
        }
    }
    Ok(())
}
