//! Error types for the watcher.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// HTTP 429.
    RateLimited,
    /// HTTP 401/403, the credential is invalid or suspended.
    Unauthorized,
    /// Network error, timeout or 5xx.
    Transient,
    /// Unexpected status or response shape.
    Malformed,
}

impl FailureKind {
    /// Get display name for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::Transient => "transient",
            Self::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of one request against the timeline API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteFailure {
    /// The credential is over the provider's quota.
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    /// The provider refused the credential.
    #[error("credential rejected (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Network failure or provider-side error.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The response could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteFailure {
    /// The persisted classification of this failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::RateLimited => FailureKind::RateLimited,
            Self::Unauthorized { .. } => FailureKind::Unauthorized,
            Self::Transient(_) => FailureKind::Transient,
            Self::Malformed(_) => FailureKind::Malformed,
        }
    }

    /// Whether the same request should be retried with the next credential.
    ///
    /// Only credential-specific failures rotate; transient and malformed
    /// failures end the cycle.
    #[must_use]
    pub const fn rotates(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unauthorized { .. })
    }
}

/// Errors that end a cycle or prevent the process from starting.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every credential in the pool is over quota or was rejected.
    #[error("all credentials exhausted after {attempted} attempt(s)")]
    CredentialsExhausted { attempted: usize },

    /// A remote failure that is not solved by rotating credentials.
    #[error("remote request failed: {0}")]
    Remote(#[from] RemoteFailure),

    /// Writing a state file failed.
    #[error("failed to persist {path}: {reason}")]
    Persistence { path: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;
