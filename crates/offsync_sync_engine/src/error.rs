//! Error types for the sync engine.

use offsync_protocol::ProtocolError;
use offsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while talking to the remote collection or
/// applying its answers locally.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote call failed or returned a non-2xx status.
    #[error("network error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Network {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote collection has no such record.
    #[error("not found: {resource}")]
    NotFound {
        /// What was looked up.
        resource: String,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Payload encoding or validation error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The request timed out.
    #[error("operation timed out")]
    Timeout,

    /// A refetch was superseded by an optimistic mutation.
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a network error for a received status.
    ///
    /// Request timeouts, conflicts, locks, rate limiting and server errors
    /// are retryable; other client errors are not.
    pub fn network(status: u16, message: impl Into<String>) -> Self {
        Self::Network {
            status: Some(status),
            message: message.into(),
            retryable: matches!(status, 408 | 409 | 423 | 425 | 429 | 500..=599),
        }
    }

    /// Creates a retryable error for a request that never got a response.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Network {
            status: None,
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a not-found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true for a missing record, locally or on the server.
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::NotFound { .. } => true,
            SyncError::Network { status, .. } => *status == Some(404),
            SyncError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Returns true if the server rejected the request itself (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self.status_code(), Some(400..=499)) || matches!(self, SyncError::NotFound { .. })
    }

    /// HTTP status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SyncError::Network { status, .. } => *status,
            SyncError::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return SyncError::Timeout;
        }
        match e.status() {
            Some(status) => SyncError::network(status.as_u16(), e.to_string()),
            None => SyncError::unreachable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::RecordId;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network(500, "boom").is_retryable());
        assert!(SyncError::network(503, "unavailable").is_retryable());
        assert!(SyncError::network(429, "slow down").is_retryable());
        assert!(SyncError::unreachable("connection refused").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::network(400, "bad title").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn not_found_classification() {
        assert!(SyncError::not_found("todos/1").is_not_found());
        assert!(SyncError::network(404, "gone").is_not_found());
        assert!(SyncError::from(StoreError::not_found(&RecordId::new("1"))).is_not_found());
        assert!(!SyncError::network(500, "boom").is_not_found());
    }

    #[test]
    fn client_errors() {
        assert!(SyncError::network(422, "invalid").is_client_error());
        assert!(SyncError::not_found("x").is_client_error());
        assert!(!SyncError::network(502, "bad gateway").is_client_error());
        assert!(!SyncError::unreachable("dns").is_client_error());
    }

    #[test]
    fn error_display() {
        let err = SyncError::network(500, "internal");
        assert_eq!(err.to_string(), "network error (500): internal");

        let err = SyncError::unreachable("refused");
        assert_eq!(err.to_string(), "network error: refused");

        assert_eq!(SyncError::Cancelled.to_string(), "operation cancelled");
    }
}
