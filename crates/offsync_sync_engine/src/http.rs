//! HTTP implementations of [`RemoteApi`].
//!
//! [`HttpRemote`] talks JSON to a REST collection over `reqwest`.
//! [`LoopbackRemote`] sends the same requests to an in-process server, so
//! tests exercise the exact wire format without sockets.

use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteApi;
use async_trait::async_trait;
use offsync_protocol::{NewRecord, Record, RecordId, RecordPatch, WireRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Header carrying the idempotency key of a create request.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Error body returned by the collection server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
}

/// Maps a non-2xx response to an error. 404 becomes [`SyncError::NotFound`].
fn status_error(status: u16, body: &str, resource: &str) -> SyncError {
    if status == 404 {
        return SyncError::not_found(resource);
    }
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.is_empty() => format!("request failed with status {status}"),
        Err(_) => format!("request failed: {body}"),
    };
    SyncError::network(status, message)
}

/// Decodes a response body, mapping failure statuses to errors.
fn parse_body<T: DeserializeOwned>(status: u16, body: &str, resource: &str) -> SyncResult<T> {
    if !(200..300).contains(&status) {
        return Err(status_error(status, body, resource));
    }
    serde_json::from_str(body).map_err(|e| {
        warn!(status, error = %e, "failed to decode response body");
        SyncError::network(status, format!("failed to parse response: {e}"))
    })
}

fn check_status(status: u16, body: &str, resource: &str) -> SyncResult<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(status_error(status, body, resource))
    }
}

/// A [`RemoteApi`] over HTTP.
///
/// The per-request timeout comes from [`ClientConfig::timeout`].
pub struct HttpRemote {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpRemote {
    /// Creates a client for the collection described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialised.
    pub fn new(config: ClientConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn read(response: reqwest::Response) -> SyncResult<(u16, String)> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, bytes = body.len(), "remote response");
        Ok((status, body))
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn list(&self) -> SyncResult<Vec<Record>> {
        let url = self.config.collection_url();
        let response = self.client.get(&url).send().await?;
        let (status, body) = Self::read(response).await?;
        let records: Vec<WireRecord> = parse_body(status, &body, &url)?;
        Ok(records.into_iter().map(WireRecord::into_record).collect())
    }

    async fn create(
        &self,
        payload: &NewRecord,
        idempotency_key: Option<&str>,
    ) -> SyncResult<Record> {
        let url = self.config.collection_url();
        let mut request = self.client.post(&url).json(payload);
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_HEADER, key);
        }
        let (status, body) = Self::read(request.send().await?).await?;
        let record: WireRecord = parse_body(status, &body, &url)?;
        Ok(record.into_record())
    }

    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> SyncResult<Record> {
        let url = self.config.record_url(id);
        let response = self.client.put(&url).json(patch).send().await?;
        let (status, body) = Self::read(response).await?;
        let record: WireRecord = parse_body(status, &body, &url)?;
        Ok(record.into_record())
    }

    async fn delete(&self, id: &RecordId) -> SyncResult<()> {
        let url = self.config.record_url(id);
        let response = self.client.delete(&url).send().await?;
        let (status, body) = Self::read(response).await?;
        check_status(status, &body, &url)
    }
}

/// Request method of a loopback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

/// A request routed to an in-process server.
#[derive(Debug, Clone)]
pub struct LoopbackRequest {
    /// Request method.
    pub method: Method,
    /// Path relative to the server root, e.g. `/todos/3`.
    pub path: String,
    /// Value of the idempotency header, if sent.
    pub idempotency_key: Option<String>,
    /// JSON body (empty for GET and DELETE).
    pub body: Vec<u8>,
}

/// A response from an in-process server.
#[derive(Debug, Clone)]
pub struct LoopbackResponse {
    /// HTTP status.
    pub status: u16,
    /// JSON body, possibly empty.
    pub body: Vec<u8>,
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles one request.
    fn handle(&self, request: LoopbackRequest) -> LoopbackResponse;
}

/// A [`RemoteApi`] that sends JSON requests straight to a [`LoopbackServer`].
pub struct LoopbackRemote<S: LoopbackServer> {
    server: S,
    config: ClientConfig,
}

impl<S: LoopbackServer> LoopbackRemote<S> {
    /// Creates a loopback client connected to the given server.
    pub fn new(server: S, config: ClientConfig) -> Self {
        Self { server, config }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }

    fn send(
        &self,
        method: Method,
        path: String,
        idempotency_key: Option<&str>,
        body: Vec<u8>,
    ) -> (u16, String, String) {
        let response = self.server.handle(LoopbackRequest {
            method,
            path: path.clone(),
            idempotency_key: idempotency_key.map(str::to_string),
            body,
        });
        debug!(?method, %path, status = response.status, "loopback response");
        let body = String::from_utf8_lossy(&response.body).into_owned();
        (response.status, body, path)
    }

    fn encode<T: Serialize>(value: &T) -> SyncResult<Vec<u8>> {
        Ok(offsync_protocol::to_json(value)?)
    }
}

#[async_trait]
impl<S: LoopbackServer> RemoteApi for LoopbackRemote<S> {
    async fn list(&self) -> SyncResult<Vec<Record>> {
        let (status, body, path) =
            self.send(Method::Get, self.config.collection_path(), None, Vec::new());
        let records: Vec<WireRecord> = parse_body(status, &body, &path)?;
        Ok(records.into_iter().map(WireRecord::into_record).collect())
    }

    async fn create(
        &self,
        payload: &NewRecord,
        idempotency_key: Option<&str>,
    ) -> SyncResult<Record> {
        let (status, body, path) = self.send(
            Method::Post,
            self.config.collection_path(),
            idempotency_key,
            Self::encode(payload)?,
        );
        let record: WireRecord = parse_body(status, &body, &path)?;
        Ok(record.into_record())
    }

    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> SyncResult<Record> {
        let (status, body, path) =
            self.send(Method::Put, self.config.record_path(id), None, Self::encode(patch)?);
        let record: WireRecord = parse_body(status, &body, &path)?;
        Ok(record.into_record())
    }

    async fn delete(&self, id: &RecordId) -> SyncResult<()> {
        let (status, body, path) =
            self.send(Method::Delete, self.config.record_path(id), None, Vec::new());
        check_status(status, &body, &path)
    }
}
