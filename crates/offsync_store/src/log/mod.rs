//! Framed append-only log.
//!
//! Every durable change is one frame:
//!
//! ```text
//! | magic "OSLG" (4) | version u16 | type u8 | len u32 | payload | crc32 |
//! ```
//!
//! All integers are little-endian. The CRC covers header and payload.
//! The module is public so other components (the server's subscription
//! registry) can persist their own payloads with the same framing.

mod frame;
mod reader;
mod writer;

pub use frame::{compute_crc32, Frame, FrameType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
pub use reader::FrameReader;
pub use writer::{LogWriter, Replay};
