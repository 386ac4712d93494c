//! Configuration for the offline client.

use offsync_protocol::RecordId;
use std::time::Duration;

/// Default collection path on the server.
pub const DEFAULT_COLLECTION: &str = "todos";

/// Tag used when registering with a background-sync scheduler.
pub const DEFAULT_SYNC_TAG: &str = "sync-todos";

/// Configuration for the remote collection and the client around it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL (e.g., "https://api.example.com/api").
    pub base_url: String,
    /// Collection path segment.
    pub collection: String,
    /// Cache key of the collection query.
    pub query_key: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Background-sync registration tag.
    pub sync_tag: String,
}

impl ClientConfig {
    /// Creates a configuration for the given server.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            query_key: DEFAULT_COLLECTION.to_string(),
            timeout: Duration::from_secs(30),
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
        }
    }

    /// Sets the collection path segment.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into().trim_matches('/').to_string();
        self
    }

    /// Sets the cache key of the collection query.
    pub fn with_query_key(mut self, key: impl Into<String>) -> Self {
        self.query_key = key.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the background-sync tag.
    pub fn with_sync_tag(mut self, tag: impl Into<String>) -> Self {
        self.sync_tag = tag.into();
        self
    }

    /// Path of the collection, relative to the server root.
    pub fn collection_path(&self) -> String {
        format!("/{}", self.collection)
    }

    /// Path of one record, relative to the server root.
    pub fn record_path(&self, id: &RecordId) -> String {
        format!("/{}/{}", self.collection, id)
    }

    /// Absolute URL of the collection.
    pub fn collection_url(&self) -> String {
        format!("{}{}", self.base_url, self.collection_path())
    }

    /// Absolute URL of one record.
    pub fn record_url(&self, id: &RecordId) -> String {
        format!("{}{}", self.base_url, self.record_path(id))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:3000/api")
    }
}
