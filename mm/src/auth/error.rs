//! Identity provider error types

use serde_json::Value;
use thiserror::Error;

/// Errors from authentication flows
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email not confirmed")]
    EmailNotConfirmed,

    #[error("Invalid or expired token: {0}")]
    InvalidToken(String),

    /// Rejected before any network call
    #[error("{0}")]
    Validation(String),

    #[error("Authentication failed: {description}")]
    Callback { error: String, description: String },

    #[error("Identity provider error {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("No pending OAuth sign-in; start again with the provider URL")]
    MissingVerifier,
}

impl AuthError {
    /// Whether the session this error came from can no longer be used
    pub fn invalidates_session(&self) -> bool {
        match self {
            AuthError::InvalidToken(_) | AuthError::NotSignedIn => true,
            AuthError::Provider { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }

    /// Map a non-2xx identity provider response onto an error
    ///
    /// Understands both the legacy `error`/`error_description` body and the
    /// newer `error_code`/`msg` body.
    pub fn from_response(status: u16, body: &Value) -> Self {
        let code = body
            .get("error_code")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let message = ["msg", "error_description", "message"]
            .iter()
            .find_map(|k| body.get(*k).and_then(Value::as_str))
            .map(String::from)
            .unwrap_or_else(|| format!("HTTP {}", status));

        match code {
            "invalid_credentials" => AuthError::InvalidCredentials,
            "invalid_grant" if message.contains("Invalid login credentials") => AuthError::InvalidCredentials,
            "email_not_confirmed" => AuthError::EmailNotConfirmed,
            "invalid_grant" | "otp_expired" | "bad_jwt" | "refresh_token_not_found" | "session_not_found" => {
                AuthError::InvalidToken(message)
            }
            _ => AuthError::Provider { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_response_legacy_invalid_login() {
        let body = json!({"error": "invalid_grant", "error_description": "Invalid login credentials"});
        assert!(matches!(AuthError::from_response(400, &body), AuthError::InvalidCredentials));
    }

    #[test]
    fn test_from_response_error_code() {
        let body = json!({"code": 400, "error_code": "invalid_credentials", "msg": "Invalid login credentials"});
        assert!(matches!(AuthError::from_response(400, &body), AuthError::InvalidCredentials));

        let body = json!({"code": 403, "error_code": "otp_expired", "msg": "Email link is invalid or has expired"});
        let err = AuthError::from_response(403, &body);
        assert!(matches!(err, AuthError::InvalidToken(ref m) if m.contains("expired")));
        assert!(err.invalidates_session());
    }

    #[test]
    fn test_from_response_unknown_falls_back_to_status() {
        let err = AuthError::from_response(502, &json!({}));
        match err {
            AuthError::Provider { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "HTTP 502");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_credentials_message() {
        assert_eq!(AuthError::InvalidCredentials.to_string(), "Invalid credentials");
        assert!(!AuthError::InvalidCredentials.invalidates_session());
    }
}
