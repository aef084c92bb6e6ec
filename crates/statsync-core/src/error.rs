//! Error taxonomy shared across the data layer.
//!
//! Raw transport and storage errors stay inside the crate. What crosses the
//! orchestrator/resolver boundary is either a `FailureLabel` attached to a
//! successful outcome, or one of the small error enums below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used to decide recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry with backoff.
    TransientNetwork,
    /// Surface as not found / invalid, never retried.
    NonRetryableClientError,
    /// Degrade to memory-only or cache-less operation.
    StorageUnavailable,
    /// Terminal until the user grants permission again.
    LocationPermissionDenied,
    /// Retryable on explicit user action only.
    LocationTimeout,
}

/// User-facing failure labels. These are soft: a payload is always
/// delivered alongside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureLabel {
    NetworkUnreachable,
    NotFound,
    InvalidRequest,
    ServerError,
    Timeout,
}

impl FailureLabel {
    pub fn message(&self) -> &'static str {
        match self {
            FailureLabel::NetworkUnreachable => "Network unreachable - showing saved data",
            FailureLabel::NotFound => "Requested data was not found",
            FailureLabel::InvalidRequest => "Request was rejected by the server",
            FailureLabel::ServerError => "Server error - showing saved data",
            FailureLabel::Timeout => "Server took too long to respond",
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Superseded by a newer request from the same consumer, or cancelled explicitly.
    #[error("Request cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location service not supported on this platform")]
    Unsupported,

    #[error("Current position unavailable")]
    PositionUnavailable,

    #[error("Timed out acquiring location")]
    Timeout,

    #[error("Location request cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ResolveError::PermissionDenied => Some(ErrorKind::LocationPermissionDenied),
            ResolveError::Timeout => Some(ErrorKind::LocationTimeout),
            _ => None,
        }
    }

    /// Whether trying again automatically could plausibly succeed.
    /// Neither permission denial nor a timeout qualify: the former needs the
    /// user to re-grant, the latter waits for an explicit retry.
    pub fn is_auto_retryable(&self) -> bool {
        matches!(self, ResolveError::PositionUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_label_serializes_snake_case() {
        let json = serde_json::to_string(&FailureLabel::NetworkUnreachable).unwrap();
        assert_eq!(json, "\"network_unreachable\"");
        let json = serde_json::to_string(&FailureLabel::ServerError).unwrap();
        assert_eq!(json, "\"server_error\"");
    }

    #[test]
    fn test_resolve_error_kinds() {
        assert_eq!(
            ResolveError::PermissionDenied.kind(),
            Some(ErrorKind::LocationPermissionDenied)
        );
        assert_eq!(ResolveError::Timeout.kind(), Some(ErrorKind::LocationTimeout));
        assert!(!ResolveError::Timeout.is_auto_retryable());
        assert!(!ResolveError::PermissionDenied.is_auto_retryable());
    }
}
