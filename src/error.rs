//! Error types with retry strategies.
//!
//! # Error Handling Philosophy
//!
//! Errors should be:
//! 1. **Actionable**: Tell the user what to do, not just what went wrong
//! 2. **Specific**: Include relevant context (file path, deployment, status code)
//! 3. **Recoverable**: Distinguish transient errors (retry) from permanent ones
//!
//! # Common Errors and Solutions
//!
//! | Error | Cause | Solution |
//! |-------|-------|----------|
//! | `AuthError` | Invalid key or missing RBAC role | Check `AZURE_OPENAI_EMBEDDING_KEY` or role assignments |
//! | `RateLimited` | Too many embedding requests | Wait for `retry_after` |
//! | `Throttled` | Cosmos DB request rate too large (16500) | Back off, raise throughput |
//! | `DeploymentNotFound` | Wrong deployment name | Check `AZURE_OPENAI_EMBEDDING_MODEL` |
//! | `IndexNotSupported` | Cluster tier lacks the index kind | Use HNSW or IVF, or upgrade the tier |
//! | `NoData` | Input has no usable documents | Run `create-embeddings` first |
//!
//! # Retry Strategies
//!
//! Each error type has an associated retry strategy:
//! - `ExponentialBackoff`: For transient network/server errors
//! - `WaitAndRetry`: For rate limiting (wait specified duration)
//! - `NoRetry`: For permanent errors (auth, invalid request, duplicates)

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for vector search operations.
pub type Result<T> = std::result::Result<T, VectorSearchError>;

/// Cosmos DB for MongoDB error code for "request rate is large".
pub const COSMOS_TOO_MANY_REQUESTS: i32 = 16500;

/// MongoDB duplicate key error code.
pub const DUPLICATE_KEY: i32 = 11000;

/// MongoDB `MaxTimeMSExpired` error code.
const MAX_TIME_EXPIRED: i32 = 50;

// ============================================================================
// Retry Strategy
// ============================================================================

/// Strategy for retrying failed operations.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff (for transient errors).
    ExponentialBackoff {
        /// Initial delay before first retry.
        base_delay: Duration,
        /// Maximum delay between retries.
        max_delay: Duration,
        /// Maximum number of attempts, including the first.
        max_attempts: u32,
    },

    /// Wait for a specific duration then retry once (for rate limits).
    WaitAndRetry {
        /// Duration to wait before retrying.
        wait: Duration,
    },

    /// Do not retry at all (permanent error).
    NoRetry,
}

impl RetryStrategy {
    /// Standard exponential backoff for network errors.
    pub fn network_backoff() -> Self {
        Self::ExponentialBackoff {
            base_delay: Duration::from_millis(125),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }

    /// Standard exponential backoff for server errors.
    pub fn server_backoff() -> Self {
        Self::ExponentialBackoff {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }

    /// Check if this strategy allows retrying.
    pub fn should_retry(&self) -> bool {
        !matches!(self, Self::NoRetry)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while embedding, loading or searching documents.
#[derive(Debug, Error)]
pub enum VectorSearchError {
    /// API error from the embedding service.
    #[error("API error: {0}")]
    ApiError(String),

    /// Embedding service rate limit exceeded.
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Cosmos DB throttled the request (request rate too large).
    #[error("Request throttled by Cosmos DB: {message}")]
    Throttled {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication or authorization error.
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Embedding deployment not found.
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    /// Network error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// BSON conversion error.
    #[error("BSON conversion error: {0}")]
    BsonError(String),

    /// File could not be read or written.
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File contents are not the expected JSON shape.
    #[error("Invalid JSON in '{path}': {message}")]
    InvalidData { path: PathBuf, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Credential could not produce a token.
    #[error("Credential error: {0}")]
    CredentialError(String),

    /// Database command or driver error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Document already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The cluster tier does not support the requested index kind.
    #[error("Index not supported: {0}")]
    IndexNotSupported(String),

    /// No usable documents were found or inserted.
    #[error("No data: {0}")]
    NoData(String),

    /// Call rejected because the circuit breaker is open.
    #[error("Circuit breaker open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },
}

impl From<reqwest::Error> for VectorSearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VectorSearchError::Timeout
        } else if err.is_connect() {
            VectorSearchError::NetworkError(format!("Connection failed: {}", err))
        } else {
            VectorSearchError::NetworkError(err.to_string())
        }
    }
}

impl From<mongodb::error::Error> for VectorSearchError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};

        let message = err.to_string();
        let code = match err.kind.as_ref() {
            ErrorKind::Command(cmd) => Some(cmd.code),
            ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
            ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => {
                return VectorSearchError::NetworkError(message);
            }
            ErrorKind::Authentication { .. } => {
                return VectorSearchError::AuthError(message);
            }
            ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
                return VectorSearchError::BsonError(message);
            }
            _ => None,
        };

        match code {
            Some(COSMOS_TOO_MANY_REQUESTS) => VectorSearchError::Throttled {
                retry_after: parse_retry_after_ms(&message),
                message,
            },
            Some(DUPLICATE_KEY) => VectorSearchError::DuplicateKey(message),
            Some(MAX_TIME_EXPIRED) => VectorSearchError::Timeout,
            _ if message.contains("TooManyRequests")
                || message.contains("Request rate is large") =>
            {
                VectorSearchError::Throttled {
                    retry_after: parse_retry_after_ms(&message),
                    message,
                }
            }
            _ => VectorSearchError::DatabaseError(message),
        }
    }
}

impl From<mongodb::bson::ser::Error> for VectorSearchError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        VectorSearchError::BsonError(err.to_string())
    }
}

/// Extract `RetryAfterMs=<n>` from a Cosmos DB error message.
pub fn parse_retry_after_ms(message: &str) -> Option<Duration> {
    let start = message.find("RetryAfterMs=")? + "RetryAfterMs=".len();
    let digits: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u64>().ok().map(Duration::from_millis)
}

// ============================================================================
// Retry Strategy Methods
// ============================================================================

impl VectorSearchError {
    /// Get the appropriate retry strategy for this error.
    ///
    /// # Example
    ///
    /// ```
    /// use cosmos_vector_search::{RetryStrategy, VectorSearchError};
    ///
    /// let error = VectorSearchError::NetworkError("connection failed".to_string());
    /// assert!(error.retry_strategy().should_retry());
    /// ```
    pub fn retry_strategy(&self) -> RetryStrategy {
        match self {
            Self::NetworkError(_) | Self::Timeout => RetryStrategy::network_backoff(),

            Self::RateLimited { retry_after, .. } => RetryStrategy::WaitAndRetry {
                wait: retry_after.unwrap_or(Duration::from_secs(60)),
            },

            Self::Throttled { retry_after, .. } => RetryStrategy::ExponentialBackoff {
                base_delay: retry_after.unwrap_or(Duration::from_millis(500)),
                max_delay: Duration::from_secs(30),
                max_attempts: 5,
            },

            Self::ApiError(msg)
                if msg.contains("500") || msg.contains("502") || msg.contains("503") =>
            {
                RetryStrategy::server_backoff()
            }
            Self::DatabaseError(_) => RetryStrategy::server_backoff(),

            Self::CircuitOpen { retry_in } => RetryStrategy::WaitAndRetry { wait: *retry_in },

            Self::AuthError(_)
            | Self::InvalidRequest(_)
            | Self::DeploymentNotFound(_)
            | Self::ConfigError(_)
            | Self::CredentialError(_)
            | Self::Io { .. }
            | Self::InvalidData { .. }
            | Self::BsonError(_)
            | Self::DuplicateKey(_)
            | Self::IndexNotSupported(_)
            | Self::NoData(_) => RetryStrategy::NoRetry,

            Self::ApiError(_) | Self::SerializationError(_) => {
                RetryStrategy::ExponentialBackoff {
                    base_delay: Duration::from_secs(1),
                    max_delay: Duration::from_secs(30),
                    max_attempts: 2,
                }
            }
        }
    }

    /// Retry hint supplied by the service, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::Throttled { retry_after, .. } => {
                *retry_after
            }
            Self::CircuitOpen { retry_in } => Some(*retry_in),
            _ => None,
        }
    }

    /// Short stable label used for metrics breakdowns.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::ApiError(_) => "api",
            Self::RateLimited { .. } => "rate_limited",
            Self::Throttled { .. } => "throttled",
            Self::InvalidRequest(_) => "invalid_request",
            Self::AuthError(_) => "auth",
            Self::DeploymentNotFound(_) => "deployment_not_found",
            Self::NetworkError(_) => "network",
            Self::Timeout => "timeout",
            Self::SerializationError(_) => "serialization",
            Self::BsonError(_) => "bson",
            Self::Io { .. } => "io",
            Self::InvalidData { .. } => "invalid_data",
            Self::ConfigError(_) => "config",
            Self::CredentialError(_) => "credential",
            Self::DatabaseError(_) => "database",
            Self::DuplicateKey(_) => "duplicate_key",
            Self::IndexNotSupported(_) => "index_not_supported",
            Self::NoData(_) => "no_data",
            Self::CircuitOpen { .. } => "circuit_open",
        }
    }

    /// Get a user-friendly description of the error with suggested action.
    pub fn user_description(&self) -> String {
        match self {
            Self::NetworkError(_) => {
                "Unable to reach the service. Check your network and endpoint.".to_string()
            }
            Self::Timeout => "Request timed out. The service may be overloaded.".to_string(),
            Self::RateLimited { .. } => {
                "Rate limited by Azure OpenAI. Waiting before retry...".to_string()
            }
            Self::Throttled { .. } => {
                "Cosmos DB is throttling requests. Backing off before retry...".to_string()
            }
            Self::AuthError(_) => {
                "Authentication failed. Check your key, or the role assignments for passwordless sign-in."
                    .to_string()
            }
            Self::DeploymentNotFound(name) => format!(
                "Deployment '{}' not found. Check AZURE_OPENAI_EMBEDDING_MODEL.",
                name
            ),
            Self::InvalidRequest(msg) => {
                format!("Invalid request: {}. Check your parameters.", msg)
            }
            Self::ConfigError(msg) => format!("Configuration error: {}.", msg),
            Self::CredentialError(msg) => format!(
                "Could not acquire an Entra ID token: {}. Sign in with `az login` or configure a managed identity.",
                msg
            ),
            Self::Io { path, .. } => format!("Could not access '{}'.", path.display()),
            Self::InvalidData { path, .. } => {
                format!("'{}' does not contain a JSON array of objects.", path.display())
            }
            Self::DuplicateKey(_) => "Document already exists in the collection.".to_string(),
            Self::IndexNotSupported(_) => {
                "This index kind is not available on your cluster tier. Try HNSW or IVF.".to_string()
            }
            Self::NoData(msg) => format!("{}. Run `cosmos-vector create-embeddings` first.", msg),
            Self::CircuitOpen { retry_in } => {
                format!("Too many failures, pausing for {:?}.", retry_in)
            }
            Self::ApiError(_) | Self::DatabaseError(_) => "Server error. Retrying...".to_string(),
            Self::SerializationError(_) | Self::BsonError(_) => {
                "Failed to convert data. This may be a malformed document.".to_string()
            }
        }
    }

    /// Check if this error is recoverable (can be retried).
    pub fn is_recoverable(&self) -> bool {
        self.retry_strategy().should_retry()
    }
}
