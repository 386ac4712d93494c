//! The collection server.

use crate::collection::RecordCollection;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, Request, RequestHandler, Response};
use crate::subscriptions::{Notifier, SubscriptionRegistry};
use std::sync::Arc;
use tracing::info;

/// The collection server.
///
/// Serves the record collection (`GET`/`POST /{collection}`,
/// `PUT`/`DELETE /{collection}/{id}`) and the push-subscription endpoints.
/// Requests are handled in-process; binding them to a socket is left to
/// the embedding application.
///
/// # Example
///
/// ```
/// use offsync_sync_server::{HttpMethod, Request, ServerConfig, TodoServer};
/// use offsync_protocol::NewRecord;
///
/// let server = TodoServer::new(ServerConfig::default()).unwrap();
/// let request = Request::new(HttpMethod::Post, "/todos")
///     .with_json(&NewRecord::new("Buy milk"))
///     .unwrap();
/// assert_eq!(server.handle(&request).status, 201);
/// assert_eq!(server.collection().len(), 1);
/// ```
pub struct TodoServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl TodoServer {
    /// Creates a server. The subscription registry is opened from
    /// `config.subscriptions_path`, or kept in memory when unset.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let registry = match &config.subscriptions_path {
            Some(path) => SubscriptionRegistry::open(path, config.sync_on_write)?,
            None => SubscriptionRegistry::in_memory()?,
        };
        info!(
            collection = %config.collection,
            subscriptions = registry.len(),
            "server started"
        );
        Ok(Self::with_registry(config, Arc::new(registry)))
    }

    /// Creates a server over an existing registry.
    pub fn with_registry(config: ServerConfig, registry: Arc<SubscriptionRegistry>) -> Self {
        let collection = Arc::new(RecordCollection::new());
        let context = Arc::new(HandlerContext::new(config, collection, registry));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Installs the notifier used for `/push/notify`.
    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.context.set_notifier(notifier);
    }

    /// Handles one request.
    pub fn handle(&self, request: &Request) -> Response {
        self.handler.handle(request)
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the record collection.
    pub fn collection(&self) -> &Arc<RecordCollection> {
        &self.context.collection
    }

    /// Returns the subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.context.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HttpMethod;
    use crate::subscriptions::MemoryNotifier;
    use offsync_protocol::{NotificationPayload, SubscriptionKeys, SubscriptionRequest};

    fn subscribe(server: &TodoServer, session: &str) {
        let body = SubscriptionRequest {
            endpoint: format!("https://push/{session}"),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "BNc".into(),
                auth: "tBH".into(),
            },
        };
        let request = Request::new(HttpMethod::Put, format!("/push/subscriptions/{session}"))
            .with_json(&body)
            .unwrap();
        assert!(server.handle(&request).is_success());
    }

    #[test]
    fn custom_collection_path() {
        let server = TodoServer::new(ServerConfig::new("tasks")).unwrap();
        assert_eq!(server.handle(&Request::new(HttpMethod::Get, "/tasks")).status, 200);
        assert_eq!(server.handle(&Request::new(HttpMethod::Get, "/todos")).status, 404);
    }

    #[test]
    fn subscriptions_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::default().with_subscriptions_path(dir.path().join("subs.log"));
        {
            let server = TodoServer::new(config.clone()).unwrap();
            subscribe(&server, "a");
            subscribe(&server, "b");
        }
        let server = TodoServer::new(config).unwrap();
        assert_eq!(server.registry().len(), 2);
    }

    #[test]
    fn notify_applies_default_icon() {
        let server =
            TodoServer::new(ServerConfig::default().with_notification_icon("/icon.png")).unwrap();
        let notifier = Arc::new(MemoryNotifier::new());
        server.set_notifier(notifier.clone());
        subscribe(&server, "a");

        let request = Request::new(HttpMethod::Post, "/push/notify")
            .with_json(&NotificationPayload::new("3 todos left"))
            .unwrap();
        assert_eq!(server.handle(&request).status, 200);

        let delivered = notifier.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.icon.as_deref(), Some("/icon.png"));
        assert_eq!(delivered[0].1.title, "Todo update");
    }
}
