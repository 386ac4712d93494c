//! Fuzz testing harnesses for offsync.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks.

use crate::integration::assert_store_consistent;
use offsync_protocol::{from_cbor, NewRecord, RecordPatch, SyncIntent, WireRecord};
use offsync_storage::InMemoryBackend;
use offsync_store::log::FrameReader;
use offsync_store::{LocalStore, StoreConfig};

/// Fuzz target for log frame decoding.
///
/// Tests that arbitrary byte sequences either decode to frames or stop
/// with an error or a torn tail (no panics).
pub fn fuzz_frame_reader(data: &[u8]) {
    let mut reader = FrameReader::new(data);
    for item in reader.by_ref() {
        if item.is_err() {
            return;
        }
    }
    assert!(reader.valid_len() <= data.len() as u64);
}

/// Fuzz target for opening a store over an arbitrary log image.
///
/// Opening must either fail cleanly or produce a consistent store.
pub fn fuzz_store_open(data: &[u8]) {
    let backend = InMemoryBackend::with_data(data.to_vec());
    if let Ok(store) = LocalStore::open_with_backend(Box::new(backend), StoreConfig::default()) {
        assert_store_consistent(&store);
    }
}

/// Fuzz target for decoding request and response bodies.
pub fn fuzz_wire_json(data: &[u8]) {
    let _ = serde_json::from_slice::<Vec<WireRecord>>(data);
    let _ = serde_json::from_slice::<WireRecord>(data);
    if let Ok(payload) = serde_json::from_slice::<NewRecord>(data) {
        let _ = payload.validate();
    }
    if let Ok(patch) = serde_json::from_slice::<RecordPatch>(data) {
        let _ = patch.validate();
    }
}

/// Fuzz target for decoding queued intents.
pub fn fuzz_intent_cbor(data: &[u8]) {
    let _ = from_cbor::<SyncIntent>(data);
}

/// Fuzz target for store operations.
///
/// Interprets the input as a sequence of operations and checks the store
/// invariants after each one.
pub fn fuzz_store_operations(data: &[u8]) {
    let store = match LocalStore::open_in_memory() {
        Ok(store) => store,
        Err(_) => return,
    };

    for chunk in data.chunks(2) {
        let op = chunk[0];
        let target = usize::from(chunk.get(1).copied().unwrap_or(0));
        let records = store.get_all();
        let pick = (!records.is_empty()).then(|| records[target % records.len()].id.clone());

        let _ = match (op % 5, pick) {
            (0, _) => store.create(NewRecord::new(format!("fuzz {target}"))).map(|_| ()),
            (1, Some(id)) => store
                .update(&id, &RecordPatch::completed(target % 2 == 0))
                .map(|_| ()),
            (2, Some(id)) => store.delete_offline(&id).map(|_| ()),
            (3, Some(id)) => store.mark_synced(&id),
            (4, _) => store.compact().map(|_| ()),
            _ => Ok(()),
        };
        assert_store_consistent(&store);
    }
}
