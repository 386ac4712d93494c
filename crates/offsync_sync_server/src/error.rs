//! Error types for the collection server.

use offsync_protocol::ProtocolError;
use offsync_storage::StorageError;
use offsync_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the collection server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format or payload.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No such record, subscription or route.
    #[error("not found: {0}")]
    NotFound(String),

    /// The route exists but not for this method.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// A feature the server was not configured for.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Registry persistence error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProtocolError> for ServerError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Encoding { message } => ServerError::Internal(message),
            ProtocolError::Decoding { message } | ProtocolError::InvalidPayload { message } => {
                ServerError::InvalidRequest(message)
            }
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(e: StorageError) -> Self {
        ServerError::Store(StoreError::from(e))
    }
}

impl ServerError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        ServerError::NotFound(what.into())
    }

    /// Creates an invalid-request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        ServerError::InvalidRequest(message.into())
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotFound(_) => 404,
            ServerError::MethodNotAllowed(_) => 405,
            ServerError::Unavailable(_) => 503,
            ServerError::Store(_) | ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}
