//! IdentityProvider trait definition

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use tokio::sync::broadcast;

use super::AuthError;
use crate::domain::{AuthUser, Session};

/// OAuth providers offered on the login screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Github,
}

impl std::fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Google => write!(f, "google"),
            Self::Github => write!(f, "github"),
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "github" => Ok(Self::Github),
            other => Err(format!("Unsupported OAuth provider '{}'. Expected google or github", other)),
        }
    }
}

/// Kind of one-time token carried by an emailed link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Signup,
    Recovery,
    Email,
    Invite,
    Magiclink,
    EmailChange,
}

impl FromStr for OtpType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup" => Ok(Self::Signup),
            "recovery" => Ok(Self::Recovery),
            "email" => Ok(Self::Email),
            "invite" => Ok(Self::Invite),
            "magiclink" => Ok(Self::Magiclink),
            "email_change" => Ok(Self::EmailChange),
            other => Err(format!("Unknown verification type '{}'", other)),
        }
    }
}

/// Result of a signup request
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// Provider auto-confirmed the account and issued a session
    SignedIn(Session),
    /// A confirmation link was emailed; no session yet
    ConfirmationRequired { email: String },
}

/// Fields changed by `update_user`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(rename = "data", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Token grant body returned by the provider's token endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl TokenGrant {
    /// Absolute expiry, preferring the provider's `expires_at`
    pub fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(|| now + Duration::seconds(self.expires_in.unwrap_or(3600)))
    }

    pub fn into_session(self) -> Session {
        let expires_at = self.expiry(Utc::now());
        Session::from_user(self.user, self.access_token, self.refresh_token, expires_at)
    }
}

/// Identity provider auth-state events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl std::fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignedIn => write!(f, "SIGNED_IN"),
            Self::SignedOut => write!(f, "SIGNED_OUT"),
            Self::TokenRefreshed => write!(f, "TOKEN_REFRESHED"),
            Self::UserUpdated => write!(f, "USER_UPDATED"),
            Self::PasswordRecovery => write!(f, "PASSWORD_RECOVERY"),
        }
    }
}

/// An auth-state change pushed by the provider client
#[derive(Debug, Clone)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    /// Session after the event; `None` once signed out
    pub session: Option<Session>,
}

/// Client for a GoTrue-style identity provider
///
/// Calls return their result to the caller only. The channel returned by
/// [`IdentityProvider::subscribe`] carries auth changes that did not come from
/// a call on this client, such as a sign-out in another process.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> Result<SignUpOutcome, AuthError>;

    /// Revoke the session server-side
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError>;

    async fn reset_password_for_email(&self, email: &str) -> Result<(), AuthError>;

    async fn update_user(&self, access_token: &str, attributes: UserAttributes) -> Result<AuthUser, AuthError>;

    async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, AuthError>;

    /// Trade an OAuth authorization code for a session
    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Session, AuthError>;

    async fn resend(&self, email: &str, otp_type: OtpType) -> Result<(), AuthError>;

    /// Authorize URL the user opens to start an OAuth sign-in
    fn authorize_url(&self, provider: OAuthProvider, code_challenge: &str) -> Result<String, AuthError>;

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::debug;

    pub const GOOD_PASSWORD: &str = "correct-horse";

    /// In-memory identity provider for unit tests
    ///
    /// Accepts any registered email with [`GOOD_PASSWORD`]. Issued tokens are
    /// `access-N`/`refresh-N`; revoked or unknown tokens fail validation.
    /// Like the real client, calls never echo on the event channel; events
    /// are only sent through [`MockIdentityProvider::emit`].
    pub struct MockIdentityProvider {
        users: Mutex<HashMap<String, AuthUser>>,
        live_access: Mutex<HashMap<String, String>>,
        live_refresh: Mutex<HashMap<String, String>>,
        issued: AtomicUsize,
        sign_out_calls: AtomicUsize,
        fail_sign_out: bool,
        confirm_signups: bool,
        sign_in_delay: Option<std::time::Duration>,
        events: broadcast::Sender<AuthStateChange>,
    }

    impl MockIdentityProvider {
        pub fn new() -> Self {
            debug!("MockIdentityProvider::new: called");
            let (events, _) = broadcast::channel(16);
            Self {
                users: Mutex::new(HashMap::new()),
                live_access: Mutex::new(HashMap::new()),
                live_refresh: Mutex::new(HashMap::new()),
                issued: AtomicUsize::new(0),
                sign_out_calls: AtomicUsize::new(0),
                fail_sign_out: false,
                confirm_signups: false,
                sign_in_delay: None,
                events,
            }
        }

        pub fn with_user(self, email: &str) -> Self {
            let user = AuthUser {
                id: format!("user-{}", email.split('@').next().unwrap_or(email)),
                email: email.to_string(),
                email_verified_at: Some(Utc::now()),
                user_metadata: Map::new(),
            };
            self.users.lock().unwrap().insert(email.to_string(), user);
            self
        }

        pub fn failing_sign_out(mut self) -> Self {
            self.fail_sign_out = true;
            self
        }

        pub fn requiring_confirmation(mut self) -> Self {
            self.confirm_signups = true;
            self
        }

        pub fn with_sign_in_delay(mut self, delay: std::time::Duration) -> Self {
            self.sign_in_delay = Some(delay);
            self
        }

        pub fn sign_out_calls(&self) -> usize {
            self.sign_out_calls.load(Ordering::SeqCst)
        }

        /// Push an event as if it came from another process
        pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
            let _ = self.events.send(AuthStateChange { event, session });
        }

        /// Drop every issued token, as a server-side revoke would
        pub fn revoke_all(&self) {
            self.live_access.lock().unwrap().clear();
            self.live_refresh.lock().unwrap().clear();
        }

        pub fn issue(&self, user: &AuthUser, expires_in: Duration) -> Session {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            let access = format!("access-{}", n);
            let refresh = format!("refresh-{}", n);
            self.live_access.lock().unwrap().insert(access.clone(), user.email.clone());
            self.live_refresh.lock().unwrap().insert(refresh.clone(), user.email.clone());
            Session::from_user(user.clone(), access, refresh, Utc::now() + expires_in)
        }

        fn user_for_access(&self, token: &str) -> Result<AuthUser, AuthError> {
            let email = self
                .live_access
                .lock()
                .unwrap()
                .get(token)
                .cloned()
                .ok_or_else(|| AuthError::InvalidToken("invalid JWT".to_string()))?;
            Ok(self.users.lock().unwrap()[&email].clone())
        }
    }

    #[async_trait]
    impl IdentityProvider for MockIdentityProvider {
        async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
            debug!(%email, "MockIdentityProvider::sign_in_with_password: called");
            if let Some(delay) = self.sign_in_delay {
                tokio::time::sleep(delay).await;
            }
            let user = self.users.lock().unwrap().get(email).cloned();
            match user {
                Some(user) if password == GOOD_PASSWORD => Ok(self.issue(&user, Duration::hours(1))),
                _ => Err(AuthError::InvalidCredentials),
            }
        }

        async fn sign_up(
            &self,
            email: &str,
            _password: &str,
            metadata: Map<String, Value>,
        ) -> Result<SignUpOutcome, AuthError> {
            debug!(%email, "MockIdentityProvider::sign_up: called");
            let user = AuthUser {
                id: format!("user-{}", email.split('@').next().unwrap_or(email)),
                email: email.to_string(),
                email_verified_at: None,
                user_metadata: metadata,
            };
            self.users.lock().unwrap().insert(email.to_string(), user.clone());
            if self.confirm_signups {
                return Ok(SignUpOutcome::ConfirmationRequired {
                    email: email.to_string(),
                });
            }
            Ok(SignUpOutcome::SignedIn(self.issue(&user, Duration::hours(1))))
        }

        async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
            debug!("MockIdentityProvider::sign_out: called");
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_sign_out {
                return Err(AuthError::Provider {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            self.live_access.lock().unwrap().remove(access_token);
            Ok(())
        }

        async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
            debug!("MockIdentityProvider::get_user: called");
            self.user_for_access(access_token)
        }

        async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
            debug!("MockIdentityProvider::refresh_session: called");
            let email = self
                .live_refresh
                .lock()
                .unwrap()
                .remove(refresh_token)
                .ok_or_else(|| AuthError::InvalidToken("Invalid Refresh Token".to_string()))?;
            let user = self.users.lock().unwrap()[&email].clone();
            Ok(self.issue(&user, Duration::hours(1)))
        }

        async fn reset_password_for_email(&self, email: &str) -> Result<(), AuthError> {
            debug!(%email, "MockIdentityProvider::reset_password_for_email: called");
            Ok(())
        }

        async fn update_user(&self, access_token: &str, attributes: UserAttributes) -> Result<AuthUser, AuthError> {
            debug!("MockIdentityProvider::update_user: called");
            let mut user = self.user_for_access(access_token)?;
            if let Some(metadata) = attributes.metadata {
                user.user_metadata.extend(metadata);
            }
            self.users.lock().unwrap().insert(user.email.clone(), user.clone());
            Ok(user)
        }

        async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, AuthError> {
            debug!(?otp_type, "MockIdentityProvider::verify_otp: called");
            let email = token_hash
                .strip_prefix("hash-")
                .ok_or_else(|| AuthError::InvalidToken("Email link is invalid or has expired".to_string()))?;
            let mut user = self
                .users
                .lock()
                .unwrap()
                .get(email)
                .cloned()
                .ok_or_else(|| AuthError::InvalidToken("Email link is invalid or has expired".to_string()))?;
            user.email_verified_at = Some(Utc::now());
            self.users.lock().unwrap().insert(email.to_string(), user.clone());
            Ok(self.issue(&user, Duration::hours(1)))
        }

        async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Session, AuthError> {
            debug!("MockIdentityProvider::exchange_code: called");
            if verifier.is_empty() {
                return Err(AuthError::MissingVerifier);
            }
            let email = code
                .strip_prefix("code-")
                .ok_or_else(|| AuthError::InvalidToken("invalid flow state".to_string()))?;
            let user = self.users.lock().unwrap().get(email).cloned();
            let user = user.ok_or_else(|| AuthError::InvalidToken("invalid flow state".to_string()))?;
            Ok(self.issue(&user, Duration::hours(1)))
        }

        async fn resend(&self, email: &str, _otp_type: OtpType) -> Result<(), AuthError> {
            debug!(%email, "MockIdentityProvider::resend: called");
            Ok(())
        }

        fn authorize_url(&self, provider: OAuthProvider, code_challenge: &str) -> Result<String, AuthError> {
            Ok(format!(
                "http://auth.test/auth/v1/authorize?provider={}&code_challenge={}",
                provider, code_challenge
            ))
        }

        fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
            self.events.subscribe()
        }
    }
}
