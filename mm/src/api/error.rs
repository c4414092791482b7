//! Backend API error types

use serde_json::Value;
use thiserror::Error;

use crate::domain::AiPayloadError;

/// Errors from backend API calls
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response; `message` is the backend's own text when it sent one
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed AI response: {0}")]
    MalformedAiResponse(String),

    #[error("AI request failed: {0}")]
    AiRejected(String),

    /// Rejected before any network call
    #[error("{0}")]
    Validation(String),
}

impl ApiError {
    /// Build an error from a non-2xx status and its (possibly empty) JSON body
    ///
    /// Prefers the body's `message`, then a string `detail`, then the status line.
    pub fn from_response(status: u16, reason: Option<&str>, body: &Value) -> Self {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| body.get("detail").and_then(Value::as_str))
            .map(String::from)
            .or_else(|| detail_list_message(body))
            .unwrap_or_else(|| format!("HTTP {}: {}", status, reason.unwrap_or("Unknown")));
        ApiError::Http { status, message }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// FastAPI validation errors carry `detail` as a list of `{loc, msg}`
fn detail_list_message(body: &Value) -> Option<String> {
    let items = body.get("detail")?.as_array()?;
    let messages: Vec<&str> = items
        .iter()
        .filter_map(|item| item.get("msg").and_then(Value::as_str))
        .collect();
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

impl From<AiPayloadError> for ApiError {
    fn from(e: AiPayloadError) -> Self {
        match e {
            AiPayloadError::Malformed(m) => ApiError::MalformedAiResponse(m),
            AiPayloadError::Rejected(m) => ApiError::AiRejected(m),
        }
    }
}
