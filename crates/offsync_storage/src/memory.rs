//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// Storage held in a shared byte buffer.
///
/// Clones point at the same buffer, so a test can drop a store and open a
/// new one over a clone to simulate a process restart.
///
/// # Example
///
/// ```rust
/// use offsync_storage::{InMemoryBackend, StorageBackend};
///
/// let mut log = InMemoryBackend::new();
/// let survivor = log.clone();
/// log.append(b"frame").unwrap();
/// assert_eq!(survivor.size().unwrap(), 5);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// An empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer seeded with `bytes`, e.g. a deliberately torn log.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        let start = offset as usize;
        Ok(bytes[start..start + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        let size = bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        bytes.truncate(new_size as usize);
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        *self.bytes.write() = data.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_back() {
        let mut log = InMemoryBackend::new();
        assert_eq!(log.append(b"OSLG").unwrap(), 0);
        assert_eq!(log.append(b"frame").unwrap(), 4);
        assert_eq!(log.read_at(4, 5).unwrap(), b"frame");
        assert_eq!(log.read_all().unwrap(), b"OSLGframe");
    }

    #[test]
    fn out_of_range_read() {
        let mut log = InMemoryBackend::new();
        log.append(b"abc").unwrap();
        assert!(matches!(
            log.read_at(2, 5),
            Err(StorageError::ReadPastEnd { size: 3, .. })
        ));
        assert!(log.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn clones_see_the_same_bytes() {
        let mut log = InMemoryBackend::new();
        let restarted = log.clone();
        log.append(b"commit").unwrap();
        assert_eq!(restarted.data(), b"commit");
    }

    #[test]
    fn truncate_and_rewrite() {
        let mut log = InMemoryBackend::with_data(b"frame|torn".to_vec());
        log.truncate(5).unwrap();
        assert_eq!(log.data(), b"frame");
        assert!(matches!(
            log.truncate(9),
            Err(StorageError::InvalidTruncate { requested: 9, size: 5 })
        ));

        log.rewrite(b"snapshot").unwrap();
        assert_eq!(log.size().unwrap(), 8);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn every_append_reads_back(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)) {
                let mut log = InMemoryBackend::new();
                let mut offsets = Vec::new();
                for chunk in &chunks {
                    offsets.push(log.append(chunk).unwrap());
                }
                for (chunk, offset) in chunks.iter().zip(offsets) {
                    prop_assert_eq!(&log.read_at(offset, chunk.len()).unwrap(), chunk);
                }
            }
        }
    }
}
