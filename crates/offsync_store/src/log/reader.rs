//! Frame decoding with torn-tail detection.

use crate::error::{StoreError, StoreResult};
use crate::log::frame::{compute_crc32, Frame, FrameType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};

/// Iterates over the frames of a log image.
///
/// - A trailing frame cut short (incomplete header or payload) ends the
///   iteration and marks the reader as torn
/// - A checksum mismatch on the last frame is also a torn write
/// - A checksum mismatch followed by more data is corruption
/// - A zero-filled tail (preallocated but never written) is torn
///
/// After iteration, [`FrameReader::valid_len`] is the offset just past the
/// last good frame.
pub struct FrameReader<'a> {
    data: &'a [u8],
    offset: usize,
    torn: bool,
    finished: bool,
}

impl<'a> FrameReader<'a> {
    /// Creates a reader over a full log image.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            torn: false,
            finished: false,
        }
    }

    /// Offset just past the last frame that decoded cleanly.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset as u64
    }

    /// Returns true if the log ended in a torn frame.
    #[must_use]
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    fn stop_torn(&mut self) -> Option<StoreResult<(u64, Frame)>> {
        self.torn = true;
        self.finished = true;
        None
    }

    fn read_next(&mut self) -> Option<StoreResult<(u64, Frame)>> {
        let start = self.offset;
        let rest = &self.data[start..];
        if rest.is_empty() {
            self.finished = true;
            return None;
        }
        if rest.iter().all(|&b| b == 0) {
            return self.stop_torn();
        }
        if rest.len() < HEADER_SIZE {
            return self.stop_torn();
        }

        let header = &rest[..HEADER_SIZE];
        if header[0..4] != LOG_MAGIC {
            return Some(Err(StoreError::corruption(format!(
                "invalid magic at offset {start}"
            ))));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > LOG_VERSION {
            return Some(Err(StoreError::invalid_format(format!(
                "unsupported log version {version} at offset {start}"
            ))));
        }

        let type_byte = header[6];
        let Some(frame_type) = FrameType::from_byte(type_byte) else {
            return Some(Err(StoreError::corruption(format!(
                "unknown frame type {type_byte} at offset {start}"
            ))));
        };

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if rest.len() < total_len {
            return self.stop_torn();
        }

        let payload_end = HEADER_SIZE + payload_len;
        let stored_crc = u32::from_le_bytes([
            rest[payload_end],
            rest[payload_end + 1],
            rest[payload_end + 2],
            rest[payload_end + 3],
        ]);
        let computed_crc = compute_crc32(&rest[..payload_end]);

        if stored_crc != computed_crc {
            if rest.len() == total_len {
                return self.stop_torn();
            }
            return Some(Err(StoreError::ChecksumMismatch {
                offset: start as u64,
                expected: stored_crc,
                actual: computed_crc,
            }));
        }

        self.offset += total_len;
        Some(Ok((
            start as u64,
            Frame {
                frame_type,
                payload: rest[HEADER_SIZE..payload_end].to_vec(),
            },
        )))
    }
}

impl Iterator for FrameReader<'_> {
    type Item = StoreResult<(u64, Frame)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = self.read_next();
        if matches!(item, Some(Err(_))) {
            self.finished = true;
        }
        item
    }
}
