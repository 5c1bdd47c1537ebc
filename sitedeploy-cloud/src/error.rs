//! Deployment error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for deployment operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors that can occur while syncing or provisioning.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transfer failed for {key}: {reason}")]
    Transfer { key: String, reason: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("waiting on external validation: {0}")]
    Pending(String),

    #[error("S3 operation failed: {0}")]
    S3(String),

    #[error("DNS operation failed: {0}")]
    Dns(String),

    #[error("CDN operation failed: {0}")]
    Cdn(String),

    #[error("local scan failed: {0}")]
    Scan(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by callers to decide between alerting,
/// re-running, and polling later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input or missing credentials. Fatal, never retried.
    Configuration,
    /// A single object transfer failed. Safe to re-run the pass.
    TransientTransfer,
    /// The remote state forbids the stage (e.g. bucket owned elsewhere).
    Precondition,
    /// Not a failure: an external process has not converged yet.
    ExternalPending,
    /// Any other failure reported by a remote service.
    Service,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::TransientTransfer => write!(f, "transfer"),
            ErrorKind::Precondition => write!(f, "precondition"),
            ErrorKind::ExternalPending => write!(f, "pending"),
            ErrorKind::Service => write!(f, "service"),
        }
    }
}

impl DeployError {
    /// Builds a transfer error for `key`.
    pub fn transfer(key: impl Into<String>, reason: impl fmt::Display) -> Self {
        DeployError::Transfer {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Config(_) | DeployError::Scan(_) => ErrorKind::Configuration,
            DeployError::Transfer { .. } | DeployError::Io(_) => ErrorKind::TransientTransfer,
            DeployError::Precondition(_) | DeployError::NotFound(_) => ErrorKind::Precondition,
            DeployError::Pending(_) => ErrorKind::ExternalPending,
            DeployError::S3(_)
            | DeployError::Dns(_)
            | DeployError::Cdn(_)
            | DeployError::Serialization(_) => ErrorKind::Service,
        }
    }

    /// Returns true if re-running the same operation later may succeed
    /// without any change to inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientTransfer | ErrorKind::ExternalPending | ErrorKind::Service
        )
    }
}
