//! # offsync sync engine
//!
//! Client-side synchronization for offline-first record collections.
//!
//! This crate provides:
//! - A remote API abstraction with HTTP, loopback and in-memory clients
//! - A sync manager that pushes pending local changes when online
//! - An optimistic mutation cache with snapshot rollback
//! - A connectivity signal and an ordered event bus
//!
//! ## Architecture
//!
//! Mutations are applied to the cache first. Online, they go straight to
//! the server and the query is refetched; offline, they are recorded in
//! the durable local store together with a sync intent. The sync manager
//! replays those intents once connectivity returns:
//!
//! 1. Records with `local_only` are created, other unsynced records updated
//! 2. Each acknowledgement replaces the local copy (retiring temporary ids)
//! 3. Queued deletions are sent last
//!
//! ## Key Invariants
//!
//! - At most one sync pass runs at a time
//! - Per-record failures never abort a pass
//! - Temporary identifiers never reach the server
//! - A failed online mutation restores the exact previous query state
//! - No lock is held across an await point

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod client;
mod config;
mod connectivity;
mod error;
mod events;
mod http;
mod remote;
mod sync;

pub use cache::{MutationCache, MutationKind, MutationOutcome};
pub use client::OfflineClient;
pub use config::{ClientConfig, DEFAULT_COLLECTION, DEFAULT_SYNC_TAG};
pub use connectivity::Connectivity;
pub use error::{SyncError, SyncResult};
pub use events::{ClientEvent, EventBus, EventHandler, EventKind, SubscriptionId};
pub use http::{
    ErrorBody, HttpRemote, LoopbackRemote, LoopbackRequest, LoopbackResponse, LoopbackServer,
    Method, IDEMPOTENCY_HEADER,
};
pub use remote::{Failure, MemoryRemote, RemoteApi, RemoteMethod};
pub use sync::{
    BackgroundRequest, BackgroundScheduler, NoBackgroundSync, SkipReason, SyncManager,
    SyncOutcome, SyncReport, SyncStats, SyncTrigger,
};
