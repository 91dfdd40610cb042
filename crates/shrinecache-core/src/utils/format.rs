use crate::api::{ApiError, ErrorKind};
use crate::loader::{Loaded, Origin};

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format an optional string, returning a default if None
pub fn format_optional(value: &Option<String>, default: &str) -> String {
    value.as_deref().unwrap_or(default).to_string()
}

/// Short note on where loaded data came from, for status lines.
pub fn freshness_note<T>(loaded: &Loaded<T>, now: chrono::DateTime<chrono::Utc>) -> String {
    let minutes = (now - loaded.fetched_at).num_minutes();
    let age = if minutes < 1 {
        "just now".to_string()
    } else {
        format!("{}m ago", minutes)
    };
    match loaded.origin {
        Origin::Fresh => "live".to_string(),
        Origin::Cached => format!("cached {}", age),
        Origin::Stale => format!("offline - showing data from {}", age),
    }
}

/// User-facing message for an API error.
pub fn user_message(err: &ApiError) -> String {
    match err.kind() {
        ErrorKind::Auth => "Session expired or invalid credentials. Please sign in.".to_string(),
        ErrorKind::Network => {
            "Unable to connect to server. Check your internet connection.".to_string()
        }
        ErrorKind::Server => "The server had a problem. Please try again later.".to_string(),
        ErrorKind::Validation => match err {
            ApiError::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        },
    }
}
