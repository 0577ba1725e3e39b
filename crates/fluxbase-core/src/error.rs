//! Error kinds shared across the Fluxbase crates.
//!
//! Every failure that can cross a crate boundary is one of these kinds.
//! The HTTP layer maps kinds to status codes and the WebSocket layer maps
//! them to frame codes; internal errors carry a correlation id that appears
//! in both the log line and the sanitized response body.

use thiserror::Error;
use uuid::Uuid;

/// Discriminant for [`Error`], used where only the kind matters
/// (status mapping, metrics, tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    Timeout,
    ResourceExhausted,
    ServiceUnavailable,
    Internal,
}

/// The error type used throughout the core.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed grammar, unknown column, type-incompatible operator.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing, invalid, expired, or revoked credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Valid credential, insufficient privilege.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No such table, function, row, or route.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique or foreign-key violation from the database.
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        /// Name of the violated constraint, when the database reported one.
        constraint: Option<String>,
    },

    /// Per-connection or per-user rate limit exceeded.
    #[error("rate limited")]
    RateLimited,

    /// Statement or request deadline exceeded.
    #[error("timeout")]
    Timeout,

    /// Pool exhausted or other capacity limit hit.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Dependency (database, feed) unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Anything else. The message is logged with the correlation id;
    /// the id alone is what clients see.
    #[error("internal error (correlation id {correlation_id})")]
    Internal {
        correlation_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    /// Wrap an arbitrary error as `Internal`, assigning a correlation id
    /// and logging the underlying cause at error level.
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        let correlation_id = Uuid::new_v4();
        let source = source.into();
        tracing::error!(%correlation_id, error = %source, "internal error");
        Error::Internal {
            correlation_id,
            source,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Error::Unauthorized(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::RateLimited => ErrorKind::RateLimited,
            Error::Timeout => ErrorKind::Timeout,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Wire code used by the WebSocket protocol and error bodies.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Message safe to show to clients: internal errors are reduced to
    /// their correlation id, everything else keeps its message.
    pub fn public_message(&self) -> String {
        match self {
            Error::Internal { correlation_id, .. } => {
                format!("internal error (correlation id {correlation_id})")
            }
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::BadRequest(format!("invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_message_is_sanitized() {
        let err = Error::internal(anyhow::anyhow!("SELECT secret FROM users failed"));
        assert!(!err.public_message().contains("SELECT"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn conflict_carries_constraint() {
        let err = Error::Conflict {
            message: "duplicate key".into(),
            constraint: Some("users_email_key".into()),
        };
        assert_eq!(err.code(), "CONFLICT");
        match err {
            Error::Conflict { constraint, .. } => {
                assert_eq!(constraint.as_deref(), Some("users_email_key"));
            }
            _ => unreachable!(),
        }
    }
}
