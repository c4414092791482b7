//! GoTrue REST client
//!
//! Implements [`IdentityProvider`] against `{auth-url}/auth/v1`. Every request
//! carries the public `apikey` header; user-scoped calls add the bearer token.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};
use url::Url;

use super::{
    AuthError, AuthEvent, AuthStateChange, IdentityProvider, OAuthProvider, OtpType, SignUpOutcome, TokenGrant,
    UserAttributes,
};
use crate::config::AuthConfig;
use crate::domain::{AuthUser, Session};

/// Capacity of the auth-state broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Route the password-reset email links back to
const RESET_PASSWORD_PATH: &str = "reset-password";

/// GoTrue identity provider client
pub struct GoTrueClient {
    base_url: Url,
    anon_key: String,
    redirect_url: String,
    http: Client,
    events: broadcast::Sender<AuthStateChange>,
}

impl GoTrueClient {
    /// Create a new client from configuration
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        debug!(?config, "from_config: called");
        if config.anon_key.trim().is_empty() {
            return Err(AuthError::Validation(
                "Identity provider public key is not configured".to_string(),
            ));
        }

        let base_url = auth_base_url(&config.url)?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(AuthError::Network)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            base_url,
            anon_key: config.anon_key.clone(),
            redirect_url: config.redirect_url.clone(),
            http,
            events,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthError::Validation(format!("Invalid auth URL: {}", e)))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("content-type", "application/json")
    }

    fn authed(&self, method: reqwest::Method, url: Url, access_token: &str) -> RequestBuilder {
        self.request(method, url).bearer_auth(access_token)
    }

    /// Push an auth change observed outside this client's own calls
    ///
    /// Results of calls made through this client are returned to the caller
    /// and never echoed here.
    pub fn notify(&self, event: AuthEvent, session: Option<Session>) {
        debug!(%event, "notify: called");
        // No subscribers is fine
        let _ = self.events.send(AuthStateChange { event, session });
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<Session, AuthError> {
        debug!(%grant_type, "token_grant: called");
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = self.request(reqwest::Method::POST, url).json(&body).send().await?;
        let grant: TokenGrant = read_json(response).await?;
        Ok(grant.into_session())
    }
}

/// `{auth-url}/auth/v1/` with the trailing slash `Url::join` needs
pub fn auth_base_url(auth_url: &str) -> Result<Url, AuthError> {
    let trimmed = auth_url.trim_end_matches('/');
    Url::parse(&format!("{}/auth/v1/", trimmed))
        .map_err(|e| AuthError::Validation(format!("Invalid auth URL '{}': {}", auth_url, e)))
}

/// Sibling of the callback route that serves the password-reset form
pub fn reset_redirect_url(redirect_url: &str) -> Result<String, AuthError> {
    let base = Url::parse(redirect_url)
        .map_err(|e| AuthError::Validation(format!("Invalid redirect URL '{}': {}", redirect_url, e)))?;
    base.join(RESET_PASSWORD_PATH)
        .map(String::from)
        .map_err(|e| AuthError::Validation(e.to_string()))
}

/// Build the OAuth authorize URL for a PKCE flow
pub fn build_authorize_url(
    base_url: &Url,
    provider: OAuthProvider,
    redirect_url: &str,
    code_challenge: &str,
) -> Result<String, AuthError> {
    let mut url = base_url
        .join("authorize")
        .map_err(|e| AuthError::Validation(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("provider", &provider.to_string())
        .append_pair("redirect_to", redirect_url)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "s256");
    Ok(url.into())
}

async fn check(response: Response) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: Value = response.json().await.unwrap_or_else(|_| json!({}));
    debug!(status = status.as_u16(), ?body, "check: provider error");
    Err(AuthError::from_response(status.as_u16(), &body))
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, AuthError> {
    let response = check(response).await?;
    Ok(response.json().await?)
}

/// Decode a signup response, which is a token grant when the provider
/// auto-confirms and a bare user otherwise
pub fn parse_signup(body: Value) -> Result<SignUpOutcome, AuthError> {
    if body.get("access_token").is_some() {
        let grant: TokenGrant = serde_json::from_value(body)?;
        return Ok(SignUpOutcome::SignedIn(grant.into_session()));
    }
    let user: AuthUser = serde_json::from_value(body)?;
    Ok(SignUpOutcome::ConfirmationRequired { email: user.email })
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        debug!(%email, "sign_in_with_password: called");
        let session = self
            .token_grant("password", json!({"email": email, "password": password}))
            .await?;
        info!(user_id = %session.user_id, "Signed in");
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> Result<SignUpOutcome, AuthError> {
        debug!(%email, "sign_up: called");
        let mut url = self.endpoint("signup")?;
        url.query_pairs_mut().append_pair("redirect_to", &self.redirect_url);

        let body = json!({"email": email, "password": password, "data": metadata});
        let response = self.request(reqwest::Method::POST, url).json(&body).send().await?;
        parse_signup(read_json(response).await?)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        debug!("sign_out: called");
        let url = self.endpoint("logout")?;
        let response = self.authed(reqwest::Method::POST, url, access_token).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        debug!("get_user: called");
        let url = self.endpoint("user")?;
        let response = self.authed(reqwest::Method::GET, url, access_token).send().await?;
        read_json(response).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        debug!("refresh_session: called");
        self.token_grant("refresh_token", json!({"refresh_token": refresh_token}))
            .await
    }

    async fn reset_password_for_email(&self, email: &str) -> Result<(), AuthError> {
        debug!(%email, "reset_password_for_email: called");
        let mut url = self.endpoint("recover")?;
        url.query_pairs_mut()
            .append_pair("redirect_to", &reset_redirect_url(&self.redirect_url)?);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&json!({"email": email}))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn update_user(&self, access_token: &str, attributes: UserAttributes) -> Result<AuthUser, AuthError> {
        debug!(
            password = attributes.password.is_some(),
            metadata = attributes.metadata.is_some(),
            "update_user: called"
        );
        let url = self.endpoint("user")?;
        let response = self
            .authed(reqwest::Method::PUT, url, access_token)
            .json(&attributes)
            .send()
            .await?;
        read_json(response).await
    }

    async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, AuthError> {
        debug!(?otp_type, "verify_otp: called");
        let url = self.endpoint("verify")?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&json!({"token_hash": token_hash, "type": otp_type}))
            .send()
            .await?;
        let grant: TokenGrant = read_json(response).await?;
        Ok(grant.into_session())
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Session, AuthError> {
        debug!("exchange_code: called");
        self.token_grant("pkce", json!({"auth_code": code, "code_verifier": verifier}))
            .await
    }

    async fn resend(&self, email: &str, otp_type: OtpType) -> Result<(), AuthError> {
        debug!(%email, ?otp_type, "resend: called");
        let url = self.endpoint("resend")?;
        let body = json!({
            "email": email,
            "type": otp_type,
            "options": {"email_redirect_to": self.redirect_url},
        });
        let response = self.request(reqwest::Method::POST, url).json(&body).send().await?;
        check(response).await?;
        Ok(())
    }

    fn authorize_url(&self, provider: OAuthProvider, code_challenge: &str) -> Result<String, AuthError> {
        debug!(%provider, "authorize_url: called");
        build_authorize_url(&self.base_url, provider, &self.redirect_url, code_challenge)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_base_url_normalizes_trailing_slash() {
        let a = auth_base_url("https://abc.supabase.co").unwrap();
        let b = auth_base_url("https://abc.supabase.co/").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.join("token").unwrap().as_str(), "https://abc.supabase.co/auth/v1/token");
    }

    #[test]
    fn test_reset_redirect_is_sibling_of_callback() {
        let url = reset_redirect_url("http://localhost:3000/auth/callback").unwrap();
        assert_eq!(url, "http://localhost:3000/auth/reset-password");
    }

    #[test]
    fn test_build_authorize_url() {
        let base = auth_base_url("https://auth.example.com").unwrap();
        let url = build_authorize_url(
            &base,
            OAuthProvider::Github,
            "http://localhost:3000/auth/callback",
            "challenge123",
        )
        .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/auth/v1/authorize");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["provider"], "github");
        assert_eq!(pairs["redirect_to"], "http://localhost:3000/auth/callback");
        assert_eq!(pairs["code_challenge"], "challenge123");
        assert_eq!(pairs["code_challenge_method"], "s256");
    }

    #[test]
    fn test_parse_signup_with_session() {
        let body = json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": {"id": "u1", "email": "new@example.com", "email_confirmed_at": "2024-05-01T00:00:00Z"}
        });
        match parse_signup(body).unwrap() {
            SignUpOutcome::SignedIn(session) => {
                assert_eq!(session.user_id, "u1");
                assert!(session.is_verified());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_signup_pending_confirmation() {
        let body = json!({"id": "u1", "email": "new@example.com", "confirmation_sent_at": "2024-05-01T00:00:00Z"});
        assert_eq!(
            parse_signup(body).unwrap(),
            SignUpOutcome::ConfirmationRequired {
                email: "new@example.com".to_string()
            }
        );
    }

    #[test]
    fn test_from_config_requires_anon_key() {
        let config = AuthConfig::default();
        assert!(matches!(GoTrueClient::from_config(&config), Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn test_authorize_url_via_trait() {
        let mut config = AuthConfig::default();
        config.anon_key = "anon".to_string();
        let client = GoTrueClient::from_config(&config).unwrap();
        let url = client.authorize_url(OAuthProvider::Google, "xyz").unwrap();
        assert!(url.starts_with("http://localhost:54321/auth/v1/authorize?provider=google"));
    }

    #[tokio::test]
    async fn test_notify_reaches_subscribers() {
        let mut config = AuthConfig::default();
        config.anon_key = "anon".to_string();
        let client = GoTrueClient::from_config(&config).unwrap();
        let mut rx = client.subscribe();

        client.notify(AuthEvent::SignedOut, None);

        let change = rx.recv().await.unwrap();
        assert_eq!(change.event, AuthEvent::SignedOut);
        assert!(change.session.is_none());
        assert!(rx.try_recv().is_err());
    }
}
