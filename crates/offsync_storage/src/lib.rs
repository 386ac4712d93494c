//! # offsync storage
//!
//! Append-only byte storage backends for the offsync local store.
//!
//! Backends are **opaque byte stores**: they never interpret what they
//! hold. The local store owns the log framing, checksums and replay.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral stores
//! - [`FileBackend`] - persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use offsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
