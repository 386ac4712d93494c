//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod sync;
pub mod todos;

use offsync_store::{LocalStore, StoreConfig, StoreError};
use offsync_sync_engine::{ClientConfig, OfflineClient, SyncError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote or sync failure.
    #[error("{0}")]
    Sync(#[from] SyncError),

    /// Output encoding failure.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    /// Invalid command-line usage.
    #[error("{0}")]
    Usage(String),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Global options shared by every command.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Store directory.
    pub path: PathBuf,
    /// API base URL; `None` works offline.
    pub server: Option<String>,
    /// Collection path segment.
    pub collection: String,
    /// Force offline mode.
    pub offline: bool,
}

impl SessionOptions {
    /// Returns true if commands should talk to the server.
    pub fn online(&self) -> bool {
        self.server.is_some() && !self.offline
    }

    /// Client configuration for these options.
    pub fn client_config(&self) -> ClientConfig {
        let config = match &self.server {
            Some(url) => ClientConfig::new(url.as_str()),
            None => ClientConfig::default(),
        };
        config.with_collection(self.collection.as_str())
    }
}

/// An open store wrapped in an offline-first client.
pub struct Session {
    /// The client.
    pub client: OfflineClient,
}

impl Session {
    /// Opens the store and builds the client.
    pub fn open(options: &SessionOptions) -> CliResult<Self> {
        let store = Arc::new(LocalStore::open(&options.path, StoreConfig::default())?);
        let online = options.online();
        debug!(path = %options.path.display(), online, "opened store");
        let client = OfflineClient::with_http(options.client_config(), store, online)?;
        Ok(Self { client })
    }

    /// The local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        self.client.store()
    }

    /// Returns true if the client considers itself online.
    pub fn is_online(&self) -> bool {
        self.client.connectivity().is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(server: Option<&str>, offline: bool) -> SessionOptions {
        SessionOptions {
            path: PathBuf::from(".offsync"),
            server: server.map(str::to_string),
            collection: "tasks".to_string(),
            offline,
        }
    }

    #[test]
    fn online_needs_server() {
        assert!(!options(None, false).online());
        assert!(options(Some("http://localhost:3000/api"), false).online());
        assert!(!options(Some("http://localhost:3000/api"), true).online());
    }

    #[test]
    fn client_config_uses_collection() {
        let config = options(Some("http://example.com/api/"), false).client_config();
        assert_eq!(config.base_url, "http://example.com/api");
        assert_eq!(config.collection_path(), "/tasks");
    }

    #[test]
    fn session_opens_offline() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(None, false);
        opts.path = dir.path().join("store");
        let session = Session::open(&opts).unwrap();
        assert!(!session.is_online());
        assert!(session.store().get_all().is_empty());
    }
}
