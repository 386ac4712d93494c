//! Frame layout and checksum.

use crate::error::{StoreError, StoreResult};

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"OSLG";

/// Current frame format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// Type of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// A set of changes applied on top of the current state.
    Commit = 1,
    /// A full state image that replaces everything before it.
    Snapshot = 2,
}

impl FrameType {
    /// Converts a byte to a frame type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the frame type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Opaque payload (CBOR for the local store).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a commit frame.
    #[must_use]
    pub fn commit(payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Commit,
            payload,
        }
    }

    /// Creates a snapshot frame.
    #[must_use]
    pub fn snapshot(payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Snapshot,
            payload,
        }
    }

    /// Size of the encoded frame in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }

    /// Encodes the frame with its envelope and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit the 4-byte length field.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let len = u32::try_from(self.payload.len())
            .map_err(|_| StoreError::invalid_format("frame payload too large"))?;

        let mut data = Vec::with_capacity(self.encoded_len());
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.frame_type.as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&self.payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// Computes the CRC-32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
