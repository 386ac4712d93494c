//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred (including quota exhaustion reported by the OS).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Truncation target lies beyond the current size.
    #[error("cannot truncate to {requested} bytes, storage holds {size}")]
    InvalidTruncate {
        /// The requested size.
        requested: u64,
        /// The current storage size.
        size: u64,
    },

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Returns true if the error came from the operating system running out
    /// of space or quota.
    pub fn is_out_of_space(&self) -> bool {
        match self {
            // ENOSPC / EDQUOT
            StorageError::Io(e) => matches!(e.raw_os_error(), Some(28) | Some(122)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_space_detection() {
        let err = StorageError::Io(io::Error::from_raw_os_error(28));
        assert!(err.is_out_of_space());
        assert!(!StorageError::Closed.is_out_of_space());
    }

    #[test]
    fn display_mentions_sizes() {
        let err = StorageError::InvalidTruncate {
            requested: 10,
            size: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains('4'));
    }
}
