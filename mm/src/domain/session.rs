//! Session domain type
//!
//! The authenticated identity plus its token pair.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User record as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,

    #[serde(default)]
    pub email: String,

    /// GoTrue calls this `email_confirmed_at`
    #[serde(default, alias = "email_confirmed_at", with = "super::timestamp::option")]
    pub email_verified_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

/// An authenticated session
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,

    pub email: String,

    /// Unset while the email address awaits confirmation
    #[serde(default, with = "super::timestamp::option")]
    pub email_verified_at: Option<DateTime<Utc>>,

    pub access_token: String,

    pub refresh_token: String,

    #[serde(with = "super::timestamp")]
    pub expires_at: DateTime<Utc>,

    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl Session {
    /// Build a session from a provider user and a fresh token pair
    pub fn from_user(
        user: AuthUser,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            email_verified_at: user.email_verified_at,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            user_metadata: user.user_metadata,
        }
    }

    /// The user half of the session
    pub fn user(&self) -> AuthUser {
        AuthUser {
            id: self.user_id.clone(),
            email: self.email.clone(),
            email_verified_at: self.email_verified_at,
            user_metadata: self.user_metadata.clone(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// True when the token expires within `margin` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Display name from signup metadata, if one was given
    pub fn full_name(&self) -> Option<&str> {
        self.user_metadata.get("full_name").and_then(Value::as_str)
    }
}

// Tokens stay out of logs
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("email_verified_at", &self.email_verified_at)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: DateTime<Utc>) -> Session {
        Session::from_user(
            AuthUser {
                id: "user-1".to_string(),
                email: "user@example.com".to_string(),
                email_verified_at: None,
                user_metadata: Map::new(),
            },
            "access-abc",
            "refresh-xyz",
            expires_at,
        )
    }

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now();
        let s = session(now + Duration::seconds(30));
        assert!(!s.is_expired_at(now));
        assert!(s.expires_within(now, Duration::seconds(60)));
        assert!(!s.expires_within(now, Duration::seconds(10)));
        assert!(s.is_expired_at(now + Duration::seconds(31)));
    }

    #[test]
    fn test_unverified_until_confirmed() {
        let mut s = session(Utc::now());
        assert!(!s.is_verified());
        s.email_verified_at = Some(Utc::now());
        assert!(s.is_verified());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", session(Utc::now()));
        assert!(!rendered.contains("access-abc"));
        assert!(!rendered.contains("refresh-xyz"));
        assert!(rendered.contains("user@example.com"));
    }

    #[test]
    fn test_serde_round_trip_keeps_user() {
        let s = session(Utc::now());
        let json = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id, "user-1");
        assert_eq!(back.bearer(), "Bearer access-abc");
    }
}
