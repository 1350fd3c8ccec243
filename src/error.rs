//! Error types for the ACME authorization workflow.

use thiserror::Error;

/// Errors produced while driving an authorization against an ACME server.
#[derive(Debug, Error)]
pub enum AcmeError {
    /// The server response was malformed or violated the protocol.
    #[error("invalid ACME response: {0}")]
    Invalid(String),

    /// The requested resource does not exist on the server.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server refused the request for this account.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The server wants the user to act before the request can succeed.
    #[error("user action required: {0}")]
    TryAgain(String),

    /// The server rejected an argument of the request.
    #[error("rejected by ACME server: {0}")]
    BadArgument(String),

    /// A transient protocol failure; repeating the operation may succeed.
    #[error("retryable ACME failure: {0}")]
    Retryable(String),

    /// Unclassified protocol or server failure.
    #[error("ACME error: {0}")]
    General(String),

    /// A challenge type was selected that this build cannot prepare.
    #[error("no implementation for challenge type '{0}'")]
    NotImplemented(String),

    /// The HTTP transport failed before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A key or certificate operation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The challenge store rejected a read or write.
    #[error("store error: {0}")]
    Store(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for ACME operations.
pub type AcmeResult<T> = Result<T, AcmeError>;

impl AcmeError {
    /// Whether repeating the failed operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AcmeError::Invalid("no Location header".to_string());
        assert!(err.to_string().contains("invalid ACME response"));
        assert!(err.to_string().contains("no Location header"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AcmeError::Retryable("bad nonce".to_string()).is_retryable());
        assert!(AcmeError::Transport("connection reset".to_string()).is_retryable());

        assert!(!AcmeError::Invalid("bad".to_string()).is_retryable());
        assert!(!AcmeError::AccessDenied("denied".to_string()).is_retryable());
        assert!(!AcmeError::NotFound("gone".to_string()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let acme_err: AcmeError = io_err.into();
        assert!(matches!(acme_err, AcmeError::Io(_)));
    }
}
