use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Upstream,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            400 | 409 | 422 => ErrorCode::Validation,
            429 => ErrorCode::RateLimited,
            502..=504 => ErrorCode::Upstream,
            _ => ErrorCode::Internal,
        }
    }
}

/// Best-effort summary of an error body returned by a backend collaborator.
///
/// The raw body is always kept; `message` is only a convenience extracted
/// from the common `{"detail": ..}` and `{"error": {"message": ..}}` shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub raw: String,
}

impl ApiError {
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| extract_message(&value))
            .unwrap_or_else(|| body.trim().to_string());
        Self {
            code: ErrorCode::from_status(status),
            message,
            raw: body.to_string(),
        }
    }
}

fn extract_message(value: &Value) -> Option<String> {
    if let Some(detail) = value.get("detail") {
        return match detail {
            Value::String(text) => Some(text.clone()),
            Value::Object(_) => extract_message(detail).or_else(|| Some(detail.to_string())),
            other => Some(other.to_string()),
        };
    }
    match value.get("error") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(error) => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        None => None,
    }
}
