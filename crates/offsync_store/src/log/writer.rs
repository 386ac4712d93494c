//! Log replay and appends.

use crate::error::StoreResult;
use crate::log::frame::Frame;
use crate::log::reader::FrameReader;
use offsync_storage::StorageBackend;
use tracing::warn;

/// Frames recovered when a log is opened.
#[derive(Debug, Default)]
pub struct Replay {
    /// Frames in log order.
    pub frames: Vec<Frame>,
    /// Bytes cut off the end because the last frame was torn.
    pub truncated_bytes: u64,
}

/// Owns a storage backend and appends frames to it.
///
/// Callers serialize access (the store keeps the writer behind a mutex).
pub struct LogWriter {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
    frames_since_rewrite: u64,
}

impl LogWriter {
    /// Opens a log, replaying every intact frame.
    ///
    /// A torn trailing frame is truncated away so the next append starts on
    /// a frame boundary.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or on corruption before the tail.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> StoreResult<(Self, Replay)> {
        let data = backend.read_all()?;
        let mut reader = FrameReader::new(&data);
        let mut frames = Vec::new();
        for item in reader.by_ref() {
            let (_, frame) = item?;
            frames.push(frame);
        }

        let mut truncated_bytes = 0;
        if reader.is_torn() {
            let valid = reader.valid_len();
            truncated_bytes = data.len() as u64 - valid;
            warn!(valid, truncated_bytes, "truncating torn log tail");
            backend.truncate(valid)?;
            backend.sync()?;
        }

        let writer = Self {
            backend,
            sync_on_write,
            frames_since_rewrite: frames.len() as u64,
        };
        Ok((
            writer,
            Replay {
                frames,
                truncated_bytes,
            },
        ))
    }

    /// Appends a frame and returns its offset.
    ///
    /// The frame is flushed before returning, and synced when the writer
    /// was opened with `sync_on_write`.
    pub fn append(&mut self, frame: &Frame) -> StoreResult<u64> {
        let data = frame.encode()?;
        let offset = self.backend.append(&data)?;
        self.backend.flush()?;
        if self.sync_on_write {
            self.backend.sync()?;
        }
        self.frames_since_rewrite += 1;
        Ok(offset)
    }

    /// Atomically replaces the log with `frames`.
    pub fn rewrite(&mut self, frames: &[Frame]) -> StoreResult<()> {
        let mut data = Vec::new();
        for frame in frames {
            data.extend_from_slice(&frame.encode()?);
        }
        self.backend.rewrite(&data)?;
        self.frames_since_rewrite = frames.len() as u64;
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Frames appended since the log was last rewritten (or opened).
    #[must_use]
    pub fn frames_since_rewrite(&self) -> u64 {
        self.frames_since_rewrite
    }
}
