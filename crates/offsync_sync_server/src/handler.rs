//! Request routing for the collection and push endpoints.

use crate::collection::RecordCollection;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::subscriptions::{Notifier, SubscriptionRegistry};
use offsync_protocol::{
    from_json, to_json, NewRecord, NotificationPayload, RecordId, RecordPatch, SessionId,
    SubscriptionRequest,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// A request as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Method.
    pub method: HttpMethod,
    /// Path relative to the API base, e.g. `/todos/3`.
    pub path: String,
    /// `Idempotency-Key` header, if present.
    pub idempotency_key: Option<String>,
    /// JSON body (empty when absent).
    pub body: Vec<u8>,
}

impl Request {
    /// Creates a request without body.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            idempotency_key: None,
            body: Vec::new(),
        }
    }

    /// Sets a JSON body.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> ServerResult<Self> {
        self.body = to_json(body)?;
        Ok(self)
    }

    /// Sets the idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A response produced by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status.
    pub status: u16,
    /// JSON body (empty for 204).
    pub body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T) -> ServerResult<Self> {
        Ok(Self {
            status,
            body: to_json(value)?,
        })
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: Vec::new(),
        }
    }

    /// Builds the `{"error": ...}` response for an error.
    pub fn error(error: &ServerError) -> Self {
        let body = serde_json::json!({ "error": error.to_string() });
        Self {
            status: error.status(),
            body: serde_json::to_vec(&body).unwrap_or_default(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Shared state behind the router.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The record collection.
    pub collection: Arc<RecordCollection>,
    /// Push subscriptions.
    pub registry: Arc<SubscriptionRegistry>,
    notifier: RwLock<Option<Arc<dyn Notifier>>>,
}

impl HandlerContext {
    /// Creates a handler context without a notifier.
    pub fn new(
        config: ServerConfig,
        collection: Arc<RecordCollection>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            config,
            collection,
            registry,
            notifier: RwLock::new(None),
        }
    }

    /// Installs the notifier used by `/push/notify`.
    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        *self.notifier.write() = Some(notifier);
    }

    fn notifier(&self) -> Option<Arc<dyn Notifier>> {
        self.notifier.read().clone()
    }
}

enum Route<'a> {
    Collection,
    Record(&'a str),
    Subscription(&'a str),
    Notify,
}

/// Routes requests to the collection and the push registry.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles one request. Errors are rendered as `{"error": ...}`.
    pub fn handle(&self, request: &Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => {
                debug!(method = %request.method, path = %request.path, status = response.status, "handled");
                response
            }
            Err(e) => {
                if e.is_server_error() {
                    warn!(method = %request.method, path = %request.path, error = %e, "request failed");
                } else {
                    debug!(method = %request.method, path = %request.path, error = %e, "request rejected");
                }
                Response::error(&e)
            }
        }
    }

    fn dispatch(&self, request: &Request) -> ServerResult<Response> {
        let path = request.path.split('?').next().unwrap_or_default();
        let route = self
            .route(path)
            .ok_or_else(|| ServerError::not_found(format!("route {path}")))?;

        match (route, request.method) {
            (Route::Collection, HttpMethod::Get) => {
                Response::json(200, &self.context.collection.list())
            }
            (Route::Collection, HttpMethod::Post) => {
                let payload: NewRecord = parse(&request.body)?;
                let (record, created) = self
                    .context
                    .collection
                    .create(payload, request.idempotency_key.as_deref())?;
                Response::json(if created { 201 } else { 200 }, &record)
            }
            (Route::Record(id), HttpMethod::Get) => {
                let id = RecordId::new(id);
                let record = self
                    .context
                    .collection
                    .get(&id)
                    .ok_or_else(|| ServerError::not_found(format!("record {id}")))?;
                Response::json(200, &record)
            }
            (Route::Record(id), HttpMethod::Put) => {
                let patch: RecordPatch = parse(&request.body)?;
                let record = self.context.collection.update(&RecordId::new(id), &patch)?;
                Response::json(200, &record)
            }
            (Route::Record(id), HttpMethod::Delete) => {
                self.context.collection.delete(&RecordId::new(id))?;
                Ok(Response::no_content())
            }
            (Route::Subscription(session), HttpMethod::Put) => {
                let subscription: SubscriptionRequest = parse(&request.body)?;
                let (stored, created) = self
                    .context
                    .registry
                    .upsert(SessionId::new(session), subscription)?;
                Response::json(if created { 201 } else { 200 }, &stored)
            }
            (Route::Subscription(session), HttpMethod::Get) => {
                let session = SessionId::new(session);
                let stored = self
                    .context
                    .registry
                    .get(&session)
                    .ok_or_else(|| ServerError::not_found(format!("subscription {session}")))?;
                Response::json(200, &stored)
            }
            (Route::Subscription(session), HttpMethod::Delete) => {
                let session = SessionId::new(session);
                if !self.context.registry.remove(&session)? {
                    return Err(ServerError::not_found(format!("subscription {session}")));
                }
                Ok(Response::no_content())
            }
            (Route::Notify, HttpMethod::Post) => {
                let mut payload: NotificationPayload = parse(&request.body)?;
                if payload.icon.is_none() {
                    payload.icon.clone_from(&self.context.config.notification_icon);
                }
                let notifier = self
                    .context
                    .notifier()
                    .ok_or_else(|| ServerError::Unavailable("push delivery".into()))?;
                let report = self.context.registry.broadcast(notifier.as_ref(), &payload)?;
                Response::json(200, &report)
            }
            (_, method) => Err(ServerError::MethodNotAllowed(format!("{method} {path}"))),
        }
    }

    fn route<'a>(&self, path: &'a str) -> Option<Route<'a>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [c] if *c == self.context.config.collection => Some(Route::Collection),
            [c, id] if *c == self.context.config.collection => Some(Route::Record(*id)),
            ["push", "subscriptions", session] => Some(Route::Subscription(*session)),
            ["push", "notify"] => Some(Route::Notify),
            _ => None,
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: &[u8]) -> ServerResult<T> {
    if body.is_empty() {
        return Err(ServerError::invalid("missing request body"));
    }
    Ok(from_json(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::MemoryNotifier;
    use offsync_protocol::{SubscriptionKeys, WireRecord};

    fn handler() -> RequestHandler {
        let context = HandlerContext::new(
            ServerConfig::default(),
            Arc::new(RecordCollection::new()),
            Arc::new(SubscriptionRegistry::in_memory().unwrap()),
        );
        RequestHandler::new(Arc::new(context))
    }

    fn create(handler: &RequestHandler, title: &str) -> WireRecord {
        let request = Request::new(HttpMethod::Post, "/todos")
            .with_json(&NewRecord::new(title))
            .unwrap();
        let response = handler.handle(&request);
        assert_eq!(response.status, 201);
        serde_json::from_slice(&response.body).unwrap()
    }

    fn error_message(response: &Response) -> String {
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        value["error"].as_str().unwrap().to_string()
    }

    #[test]
    fn collection_crud() {
        let handler = handler();
        let record = create(&handler, "a");

        let path = format!("/todos/{}", record.id);
        let response = handler.handle(
            &Request::new(HttpMethod::Put, &path)
                .with_json(&RecordPatch::completed(true))
                .unwrap(),
        );
        assert_eq!(response.status, 200);
        let updated: WireRecord = serde_json::from_slice(&response.body).unwrap();
        assert!(updated.completed);

        let response = handler.handle(&Request::new(HttpMethod::Get, "/todos?fresh=1"));
        let listed: Vec<WireRecord> = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(listed, vec![updated]);

        let response = handler.handle(&Request::new(HttpMethod::Delete, &path));
        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());

        let response = handler.handle(&Request::new(HttpMethod::Delete, &path));
        assert_eq!(response.status, 404);
        assert!(error_message(&response).contains("not found"));
    }

    #[test]
    fn idempotent_post_returns_200() {
        let handler = handler();
        let request = Request::new(HttpMethod::Post, "/todos")
            .with_json(&NewRecord::new("a"))
            .unwrap()
            .with_idempotency_key("k");
        assert_eq!(handler.handle(&request).status, 201);
        assert_eq!(handler.handle(&request).status, 200);
        assert_eq!(handler.context.collection.len(), 1);
    }

    #[test]
    fn bad_requests() {
        let handler = handler();
        let response = handler.handle(&Request::new(HttpMethod::Post, "/todos"));
        assert_eq!(response.status, 400);

        let mut request = Request::new(HttpMethod::Post, "/todos");
        request.body = b"{not json".to_vec();
        assert_eq!(handler.handle(&request).status, 400);

        let request = Request::new(HttpMethod::Post, "/todos")
            .with_json(&NewRecord::new(""))
            .unwrap();
        let response = handler.handle(&request);
        assert_eq!(response.status, 400);
        assert!(error_message(&response).contains("title"));
    }

    #[test]
    fn unknown_routes_and_methods() {
        let handler = handler();
        assert_eq!(handler.handle(&Request::new(HttpMethod::Get, "/other")).status, 404);
        assert_eq!(handler.handle(&Request::new(HttpMethod::Delete, "/todos")).status, 405);
        assert_eq!(handler.handle(&Request::new(HttpMethod::Get, "/push/notify")).status, 405);
    }

    #[test]
    fn subscription_lifecycle() {
        let handler = handler();
        let body = SubscriptionRequest {
            endpoint: "https://push/a".into(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "BNc".into(),
                auth: "tBH".into(),
            },
        };
        let put = Request::new(HttpMethod::Put, "/push/subscriptions/s1")
            .with_json(&body)
            .unwrap();
        assert_eq!(handler.handle(&put).status, 201);
        assert_eq!(handler.handle(&put).status, 200);

        let get = Request::new(HttpMethod::Get, "/push/subscriptions/s1");
        assert_eq!(handler.handle(&get).status, 200);

        let notify = Request::new(HttpMethod::Post, "/push/notify")
            .with_json(&NotificationPayload::new("hi"))
            .unwrap();
        assert_eq!(handler.handle(&notify).status, 503);

        let notifier = Arc::new(MemoryNotifier::new());
        handler.context.set_notifier(notifier.clone());
        assert_eq!(handler.handle(&notify).status, 200);
        assert_eq!(notifier.delivered().len(), 1);

        let delete = Request::new(HttpMethod::Delete, "/push/subscriptions/s1");
        assert_eq!(handler.handle(&delete).status, 204);
        assert_eq!(handler.handle(&delete).status, 404);
        assert_eq!(handler.handle(&get).status, 404);
    }
}
