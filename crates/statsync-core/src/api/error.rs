use thiserror::Error;

use crate::error::{ErrorKind, FailureLabel};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Request rejected with status {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            404 => ApiError::NotFound(truncated),
            408 => ApiError::Timeout,
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError {
                status,
                body: truncated,
            },
            _ => ApiError::ClientError {
                status,
                body: truncated,
            },
        }
    }

    /// Timeouts, 5xx, rate limiting and missing responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout
                | ApiError::Unreachable(_)
                | ApiError::ServerError { .. }
                | ApiError::RateLimited
        )
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            ErrorKind::TransientNetwork
        } else {
            ErrorKind::NonRetryableClientError
        }
    }

    pub fn failure_label(&self) -> FailureLabel {
        match self {
            ApiError::NotFound(_) => FailureLabel::NotFound,
            ApiError::ClientError { .. } | ApiError::InvalidResponse(_) => {
                FailureLabel::InvalidRequest
            }
            ApiError::ServerError { .. } | ApiError::RateLimited => FailureLabel::ServerError,
            ApiError::Timeout => FailureLabel::Timeout,
            ApiError::Unreachable(_) => FailureLabel::NetworkUnreachable,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::from_status(status.as_u16(), &e.to_string())
        } else {
            // Connect failures, resets and DNS errors: no response at all
            ApiError::Unreachable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert_eq!(ApiError::from_status(404, "gone"), ApiError::NotFound("gone".into()));
        assert_eq!(ApiError::from_status(429, ""), ApiError::RateLimited);
        assert!(matches!(
            ApiError::from_status(503, "busy"),
            ApiError::ServerError { status: 503, .. }
        ));
        assert!(matches!(
            ApiError::from_status(400, "bad"),
            ApiError::ClientError { status: 400, .. }
        ));
    }

    #[test]
    fn test_transient_vs_permanent() {
        assert!(ApiError::Timeout.is_transient());
        assert!(ApiError::Unreachable("refused".into()).is_transient());
        assert!(ApiError::from_status(500, "").is_transient());
        assert!(!ApiError::from_status(404, "").is_transient());
        assert!(!ApiError::from_status(422, "").is_transient());
        assert_eq!(ApiError::Timeout.kind(), ErrorKind::TransientNetwork);
    }

    #[test]
    fn test_failure_labels() {
        assert_eq!(ApiError::from_status(404, "").failure_label(), FailureLabel::NotFound);
        assert_eq!(ApiError::from_status(502, "").failure_label(), FailureLabel::ServerError);
        assert_eq!(ApiError::Timeout.failure_label(), FailureLabel::Timeout);
        assert_eq!(
            ApiError::Unreachable("x".into()).failure_label(),
            FailureLabel::NetworkUnreachable
        );
    }

    #[test]
    fn test_long_bodies_truncated() {
        let body = "é".repeat(400);
        match ApiError::from_status(500, &body) {
            ApiError::ServerError { body, .. } => {
                assert!(body.contains("truncated, 800 total bytes"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
