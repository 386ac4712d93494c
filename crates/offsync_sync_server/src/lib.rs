//! # offsync sync server
//!
//! Reference server for offsync clients.
//!
//! This crate provides:
//! - The REST record collection (list, create, update, delete)
//! - Idempotent creates keyed by the `Idempotency-Key` header
//! - A persistent push-subscription registry keyed by session
//! - Notification fan-out with pruning of gone subscriptions
//!
//! # Architecture
//!
//! The server is transport-agnostic: [`TodoServer::handle`] maps a
//! [`Request`] to a [`Response`]. Records live in memory with sequential
//! integer identifiers. Push subscriptions are persisted in the same
//! framed log format the client store uses.
//!
//! # Errors
//!
//! Every failure is answered with a JSON body of the form
//! `{"error": "<message>"}` and the matching status code.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod collection;
mod config;
mod error;
mod handler;
mod server;
mod subscriptions;

pub use collection::RecordCollection;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, HttpMethod, Request, RequestHandler, Response};
pub use server::TodoServer;
pub use subscriptions::{
    BroadcastReport, DeliveryError, MemoryNotifier, Notifier, SubscriptionRegistry,
};
