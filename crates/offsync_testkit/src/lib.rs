//! # offsync testkit
//!
//! Test utilities for offsync.
//!
//! This crate provides:
//! - Test fixtures and store helpers
//! - Property-based test generators using proptest
//! - Store consistency checks and a model-tracking harness
//! - Crash recovery harnesses over a crash-simulating backend
//! - Fuzz testing harnesses
//!
//! ## Usage
//!
//! ```rust
//! use offsync_testkit::prelude::*;
//! use offsync_protocol::NewRecord;
//!
//! with_temp_store(|store| {
//!     store.create(NewRecord::new("Buy milk")).unwrap();
//!     assert_store_consistent(store);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use integration::*;
