//! Error types for secret keeper operations.

use thiserror::Error;

/// Result type for keeper operations.
pub type SecretResult<T> = std::result::Result<T, SecretError>;

/// Errors that can occur during keeper operations.
#[derive(Error, Debug)]
pub enum SecretError {
    /// No secret with the given id or name exists.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// The backend or a policy forbids the mutation.
    #[error("keeper is read-only: {0}")]
    ReadOnly(String),

    /// A secret with the same identity key already exists.
    #[error("duplicate secret: {0}")]
    Duplicate(String),

    /// The backend cannot perform this operation at all.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The backend asked us to slow down.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// The underlying backend failed.
    #[error("backend error: {message}")]
    Backend {
        /// Error message from the backend
        message: String,
        /// HTTP status code if applicable
        status_code: Option<u16>,
    },

    /// Sealing or unsealing a stored secret failed.
    #[error("encryption error: {0}")]
    Crypto(String),

    /// Encoding or decoding a stored secret failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The keeper agent is not reachable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SecretError {
    /// Create a not-found error for the given id or name.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a read-only error with a reason.
    pub fn read_only(reason: impl Into<String>) -> Self {
        Self::ReadOnly(reason.into())
    }

    /// Create a new backend error with an optional status code.
    pub fn backend(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Backend {
            message: message.into(),
            status_code,
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SecretError::NotFound(_))
    }

    /// Check if this is a read-only error.
    pub fn is_read_only(&self) -> bool {
        matches!(self, SecretError::ReadOnly(_))
    }

    /// Check if this error is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SecretError::RateLimited(_) | SecretError::ServiceUnavailable(_) | SecretError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SecretError::not_found("abc123");
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(SecretError::not_found("x").is_not_found());
        assert!(SecretError::read_only("cache").is_read_only());
        assert!(!SecretError::not_found("x").is_read_only());
        assert!(SecretError::RateLimited("slow down".to_string()).is_retryable());
        assert!(!SecretError::not_found("x").is_retryable());
    }

    #[test]
    fn test_backend_error() {
        let err = SecretError::backend("throttled", Some(429));
        assert!(err.to_string().contains("throttled"));
    }
}
