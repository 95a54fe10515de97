use reqwest::StatusCode;
use thiserror::Error;

use super::TransportError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - session expired, please log in again")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("{0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(#[from] TransportError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not logged in")]
    NoSession,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let cut = (0..=MAX_ERROR_BODY_LENGTH)
                .rev()
                .find(|&i| body.is_char_boundary(i))
                .unwrap_or(0);
            format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            400 => ApiError::Validation(Self::validation_message(body)),
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(Self::detail_or_body(body)),
            404 => ApiError::NotFound(Self::detail_or_body(body)),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(Self::truncate_body(body)),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, Self::truncate_body(body))),
        }
    }

    /// Whether the caller's session is gone and they must log in again
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::NoSession)
    }

    /// `{"detail": "..."}` is the REST framework's shape for non-field errors
    fn detail_or_body(body: &str) -> String {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    /// Flatten field errors like `{"title": ["This field is required."]}`
    /// into a single sentence list
    fn validation_message(body: &str) -> String {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
            return Self::truncate_body(body);
        };
        let mut messages = Vec::new();
        collect_messages(&value, &mut messages);
        if messages.is_empty() {
            "An unknown error occurred.".to_string()
        } else {
            messages.join(" ")
        }
    }
}

fn collect_messages(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_messages(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_messages(v, out)),
        _ => {}
    }
}
