//! Auth redirect parameters

use tracing::debug;
use url::Url;

use crate::auth::{AuthError, OtpType};

/// Query parameters the identity provider appends to the redirect URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub token_hash: Option<String>,
    pub otp_type: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a full redirect URL, or a bare `a=b&c=d` query string
    pub fn parse(input: &str) -> Result<Self, AuthError> {
        debug!(len = input.len(), "CallbackParams::parse: called");
        let input = input.trim();
        let url = if input.contains("://") {
            Url::parse(input).map_err(|e| AuthError::Validation(format!("Invalid callback URL: {}", e)))?
        } else {
            let query = input.trim_start_matches('?');
            Url::parse(&format!("http://callback.invalid/?{}", query))
                .map_err(|e| AuthError::Validation(format!("Invalid callback query: {}", e)))?
        };

        let mut params = Self::default();
        // Implicit-flow errors arrive in the fragment
        let fragment_pairs = url
            .fragment()
            .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect::<Vec<_>>())
            .unwrap_or_default();

        for (key, value) in url.query_pairs().into_owned().chain(fragment_pairs) {
            let slot = match key.as_str() {
                "code" => &mut params.code,
                "token_hash" => &mut params.token_hash,
                "type" => &mut params.otp_type,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if !value.is_empty() {
                *slot = Some(value);
            }
        }
        Ok(params)
    }

    /// The provider reported a failure
    pub fn failure(&self) -> Option<AuthError> {
        self.error.as_ref().map(|error| AuthError::Callback {
            error: error.clone(),
            description: self
                .error_description
                .clone()
                .unwrap_or_else(|| "Authentication failed".to_string()),
        })
    }

    /// Email-link verification to perform, if the link carries one
    pub fn verification(&self) -> Option<(&str, OtpType)> {
        let otp_type = match self.otp_type.as_deref()? {
            "email" => OtpType::Email,
            "signup" => OtpType::Signup,
            "recovery" => OtpType::Recovery,
            _ => return None,
        };
        Some((self.token_hash.as_deref()?, otp_type))
    }
}
