use thiserror::Error;

/// Top-level error type for Opscribe.
///
/// Storage and embedding failures are carried as dedicated variants so the
/// API layer can map them to the right status code and retry guidance
/// without string matching.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OpscribeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The write would violate a uniqueness rule, e.g. a duplicate node key.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Embedding provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OpscribeError {
    /// Whether retrying the failed operation may succeed.
    ///
    /// Only transient embedding-provider failures are retryable. Missing
    /// entities, bad input and storage failures are surfaced as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            OpscribeError::Provider(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Failure reported by (or while talking to) the embedding provider.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Seconds the provider asked us to wait, if it said so.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self.kind {
            ProviderErrorKind::RateLimited { retry_after_secs } => retry_after_secs,
            _ => None,
        }
    }
}

/// Classification of provider failures into transient and fatal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// HTTP 429.
    RateLimited { retry_after_secs: Option<u64> },
    /// HTTP 5xx.
    Server,
    /// Connection refused, reset, DNS failure.
    Transport,
    /// HTTP 401/403 or a missing API key.
    Auth,
    /// The provider rejected the request itself (HTTP 400/404/422).
    BadRequest,
    /// The response could not be decoded or did not match the request.
    BadResponse,
}

impl ProviderErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderErrorKind::Timeout
                | ProviderErrorKind::RateLimited { .. }
                | ProviderErrorKind::Server
                | ProviderErrorKind::Transport
        )
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::RateLimited { .. } => "rate limited",
            ProviderErrorKind::Server => "server error",
            ProviderErrorKind::Transport => "transport error",
            ProviderErrorKind::Auth => "authentication failed",
            ProviderErrorKind::BadRequest => "bad request",
            ProviderErrorKind::BadResponse => "bad response",
        };
        f.write_str(label)
    }
}

impl From<toml::de::Error> for OpscribeError {
    fn from(err: toml::de::Error) -> Self {
        OpscribeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for OpscribeError {
    fn from(err: toml::ser::Error) -> Self {
        OpscribeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for OpscribeError {
    fn from(err: serde_json::Error) -> Self {
        OpscribeError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Opscribe operations.
pub type Result<T> = std::result::Result<T, OpscribeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OpscribeError::NotFound("graph 42".to_string());
        assert_eq!(err.to_string(), "Not found: graph 42");

        let err = OpscribeError::DimensionMismatch {
            expected: 1536,
            actual: 384,
        };
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 1536, got 384"
        );

        let err = OpscribeError::Conflict("node key 'db'".to_string());
        assert_eq!(err.to_string(), "Conflict: node key 'db'");
    }

    #[test]
    fn test_provider_error_display() {
        let err: OpscribeError =
            ProviderError::new(ProviderErrorKind::Server, "HTTP 502").into();
        assert_eq!(
            err.to_string(),
            "Embedding provider error: server error: HTTP 502"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let transient = [
            ProviderErrorKind::Timeout,
            ProviderErrorKind::RateLimited {
                retry_after_secs: Some(3),
            },
            ProviderErrorKind::Server,
            ProviderErrorKind::Transport,
        ];
        for kind in transient {
            let err: OpscribeError = ProviderError::new(kind, "x").into();
            assert!(err.is_retryable(), "{kind} should be retryable");
        }

        let fatal = [
            ProviderErrorKind::Auth,
            ProviderErrorKind::BadRequest,
            ProviderErrorKind::BadResponse,
        ];
        for kind in fatal {
            let err: OpscribeError = ProviderError::new(kind, "x").into();
            assert!(!err.is_retryable(), "{kind} should be fatal");
        }
    }

    #[test]
    fn test_non_provider_errors_are_not_retryable() {
        assert!(!OpscribeError::NotFound("g".into()).is_retryable());
        assert!(!OpscribeError::InvalidArgument("limit".into()).is_retryable());
        assert!(!OpscribeError::Conflict("node key".into()).is_retryable());
        assert!(!OpscribeError::Storage("disk".into()).is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = ProviderError::new(
            ProviderErrorKind::RateLimited {
                retry_after_secs: Some(7),
            },
            "slow down",
        );
        assert_eq!(err.retry_after_secs(), Some(7));
        assert_eq!(
            ProviderError::new(ProviderErrorKind::Server, "x").retry_after_secs(),
            None
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OpscribeError = io_err.into();
        assert!(matches!(err, OpscribeError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: OpscribeError = err.unwrap_err().into();
        assert!(matches!(err, OpscribeError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: OpscribeError = err.unwrap_err().into();
        assert!(matches!(err, OpscribeError::Serialization(_)));
    }
}
