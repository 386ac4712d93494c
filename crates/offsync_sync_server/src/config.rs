//! Server configuration.

use std::path::PathBuf;

/// Configuration for the collection server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Collection path segment (`/{collection}`).
    pub collection: String,
    /// File for the push-subscription registry. `None` keeps it in memory.
    pub subscriptions_path: Option<PathBuf>,
    /// Whether to sync the registry file on every change.
    pub sync_on_write: bool,
    /// Icon attached to notifications that do not carry one.
    pub notification_icon: Option<String>,
}

impl ServerConfig {
    /// Creates a configuration serving `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into().trim_matches('/').to_string(),
            subscriptions_path: None,
            sync_on_write: true,
            notification_icon: None,
        }
    }

    /// Persists push subscriptions in `path`.
    pub fn with_subscriptions_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.subscriptions_path = Some(path.into());
        self
    }

    /// Sets whether to sync the registry file on every change.
    pub fn with_sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the default notification icon.
    pub fn with_notification_icon(mut self, icon: impl Into<String>) -> Self {
        self.notification_icon = Some(icon.into());
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("todos")
    }
}
