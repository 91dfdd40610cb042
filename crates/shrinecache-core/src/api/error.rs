use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by the API transport.
///
/// Clone so a single in-flight fetch result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Request rejected ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Coarse error categories callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No response was received.
    Network,
    /// 5xx or a body that could not be understood.
    Server,
    /// 401 or rejected credentials.
    Auth,
    /// Any other 4xx, usually with a message from the server.
    Validation,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

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

    /// Prefer the server's structured `message`/`error` field over the raw body.
    fn message_from_body(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody { message: Some(m), .. }) if !m.is_empty() => m,
            Ok(ErrorBody { error: Some(e), .. }) if !e.is_empty() => e,
            _ => Self::truncate_body(body),
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let message = Self::message_from_body(body);
        match status {
            401 => ApiError::Unauthorized(message),
            429 => ApiError::RateLimited,
            400..=499 => ApiError::Validation { status, message },
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) => ErrorKind::Network,
            ApiError::Unauthorized(_) => ErrorKind::Auth,
            ApiError::Validation { .. } | ApiError::RateLimited => ErrorKind::Validation,
            ApiError::Server { .. } | ApiError::InvalidResponse(_) => ErrorKind::Server,
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::Timeout(_) | ApiError::RateLimited | ApiError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
