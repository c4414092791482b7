//! SessionStore - actor that owns the session
//!
//! Every write to the session goes through one actor task. Operations draw a
//! ticket when they are issued and the actor only applies a write whose ticket
//! is newer than the last one applied, so a slow sign-in can never clobber an
//! auth event that was issued after it.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::callback::CallbackParams;
use super::messages::{ChangeSource, SessionChange, SessionCommand, SessionError, SessionResponse, SessionState, Ticket};
use super::storage::SessionStorage;
use crate::api::TokenSource;
use crate::auth::{
    AuthError, AuthStateChange, IdentityProvider, OAuthProvider, OtpType, PkcePair, SignUpOutcome, UserAttributes,
    validate_email, validate_new_password,
};
use crate::config::SessionConfig;
use crate::domain::Session;

/// Capacity of the command queue
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the change broadcast
const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Background refresh behavior
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    pub enabled: bool,
    /// Refresh this long before the access token expires
    pub margin: Duration,
}

impl From<&SessionConfig> for RefreshPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            enabled: config.auto_refresh,
            margin: Duration::seconds(config.refresh_margin_secs as i64),
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            margin: Duration::seconds(60),
        }
    }
}

/// Handle to the session actor
#[derive(Clone)]
pub struct SessionStore {
    tx: mpsc::Sender<SessionCommand>,
    change_tx: broadcast::Sender<SessionChange>,
    tickets: Arc<AtomicU64>,
    provider: Arc<dyn IdentityProvider>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    /// Spawn the session actor and its provider listener
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        provider: Arc<dyn IdentityProvider>,
        storage: Arc<dyn SessionStorage>,
        policy: RefreshPolicy,
    ) -> Self {
        debug!(?policy, "spawn: called");
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        // Subscribe before anything can be published
        let provider_rx = provider.subscribe();

        tokio::spawn(actor_loop(rx, storage.clone(), change_tx.clone()));

        let store = Self {
            tx,
            change_tx,
            tickets: Arc::new(AtomicU64::new(0)),
            provider,
            storage,
        };

        tokio::spawn(provider_listener(store.clone(), provider_rx));
        if policy.enabled {
            debug!("spawn: auto refresh enabled");
            tokio::spawn(auto_refresh_loop(store.clone(), policy.margin));
        }

        info!("SessionStore spawned");
        store
    }

    /// Subscribe to applied session changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.change_tx.subscribe()
    }

    fn next_ticket(&self) -> Ticket {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn send(&self, cmd: SessionCommand) -> SessionResponse<()> {
        self.tx.send(cmd).await.map_err(|_| SessionError::ChannelError)
    }

    async fn begin(&self, ticket: Ticket) -> SessionResponse<()> {
        self.send(SessionCommand::Begin { ticket }).await
    }

    async fn apply(&self, ticket: Ticket, source: ChangeSource, session: Option<Session>) -> SessionResponse<bool> {
        debug!(ticket, %source, has_session = session.is_some(), "apply: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::Apply {
            ticket,
            source,
            session,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| SessionError::ChannelError)
    }

    /// Record a failure and hand the error back
    async fn fail<T>(&self, ticket: Ticket, err: impl Into<SessionError>) -> SessionResponse<T> {
        let err = err.into();
        debug!(ticket, error = %err, "fail: called");
        self.send(SessionCommand::Fail {
            ticket,
            message: err.user_message(),
        })
        .await?;
        Err(err)
    }

    /// Current state: session, loading flag and last error
    pub async fn state(&self) -> SessionResponse<SessionState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::Get { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| SessionError::ChannelError)
    }

    /// The live session, if any
    pub async fn current(&self) -> Option<Session> {
        self.state().await.ok().and_then(|s| s.session)
    }

    async fn require_session(&self) -> SessionResponse<Session> {
        self.current().await.ok_or(SessionError::Auth(AuthError::NotSignedIn))
    }

    pub async fn clear_error(&self) -> SessionResponse<()> {
        self.send(SessionCommand::ClearError).await
    }

    /// Sign in with email and password
    ///
    /// The returned session is only installed if no newer write was issued
    /// while the request was in flight.
    pub async fn sign_in(&self, email: &str, password: &str) -> SessionResponse<Session> {
        debug!(%email, "sign_in: called");
        let ticket = self.next_ticket();
        self.begin(ticket).await?;

        if let Err(e) = validate_email(email) {
            return self.fail(ticket, e).await;
        }

        match self.provider.sign_in_with_password(email.trim(), password).await {
            Ok(session) => {
                self.apply(ticket, ChangeSource::SignIn, Some(session.clone())).await?;
                Ok(session)
            }
            Err(e) => self.fail(ticket, e).await,
        }
    }

    /// Register a new account
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> SessionResponse<SignUpOutcome> {
        debug!(%email, "sign_up: called");
        let ticket = self.next_ticket();
        self.begin(ticket).await?;

        if let Err(e) = validate_email(email) {
            return self.fail(ticket, e).await;
        }

        match self.provider.sign_up(email.trim(), password, metadata).await {
            Ok(SignUpOutcome::SignedIn(session)) => {
                self.apply(ticket, ChangeSource::SignUp, Some(session.clone())).await?;
                Ok(SignUpOutcome::SignedIn(session))
            }
            Ok(outcome) => {
                info!("Sign-up awaiting email confirmation");
                self.apply(ticket, ChangeSource::SignUp, None).await?;
                Ok(outcome)
            }
            Err(e) => self.fail(ticket, e).await,
        }
    }

    /// Revoke remotely and clear locally
    ///
    /// The local session is cleared even when the revoke call fails.
    pub async fn sign_out(&self) -> SessionResponse<()> {
        debug!("sign_out: called");
        let ticket = self.next_ticket();
        self.begin(ticket).await?;

        if let Some(session) = self.current().await
            && let Err(e) = self.provider.sign_out(&session.access_token).await
        {
            warn!(error = %e, "Remote sign-out failed; clearing local session anyway");
        }

        self.apply(ticket, ChangeSource::SignOut, None).await?;
        info!("Signed out");
        Ok(())
    }

    /// Recover a persisted session on start
    ///
    /// Expired sessions are refreshed first; anything the provider rejects is
    /// dropped. Never an error.
    pub async fn initialize_auth(&self) -> Option<Session> {
        debug!("initialize_auth: called");
        let ticket = self.next_ticket();
        if self.begin(ticket).await.is_err() {
            return None;
        }

        let restored = match self.storage.load() {
            Ok(restored) => restored,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted session");
                None
            }
        };

        let validated = match restored {
            Some(session) => self.validate_restored(session).await,
            None => {
                debug!("initialize_auth: no persisted session");
                None
            }
        };

        match self.apply(ticket, ChangeSource::Initialize, validated.clone()).await {
            Ok(_) => validated,
            Err(e) => {
                warn!(error = %e, "initialize_auth: session actor unavailable");
                None
            }
        }
    }

    async fn validate_restored(&self, session: Session) -> Option<Session> {
        debug!(user_id = %session.user_id, expired = session.is_expired(), "validate_restored: called");
        let session = if session.is_expired() {
            match self.provider.refresh_session(&session.refresh_token).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    debug!(error = %e, "validate_restored: refresh failed");
                    return None;
                }
            }
        } else {
            session
        };

        match self.provider.get_user(&session.access_token).await {
            Ok(user) => Some(Session::from_user(
                user,
                session.access_token,
                session.refresh_token,
                session.expires_at,
            )),
            Err(e) => {
                debug!(error = %e, "validate_restored: provider rejected session");
                None
            }
        }
    }

    /// Exchange the refresh token for a new session
    ///
    /// A rejected refresh token ends the session.
    pub async fn refresh(&self) -> SessionResponse<Session> {
        debug!("refresh: called");
        let ticket = self.next_ticket();
        self.begin(ticket).await?;
        let current = match self.require_session().await {
            Ok(s) => s,
            Err(e) => return self.fail(ticket, e).await,
        };

        match self.provider.refresh_session(&current.refresh_token).await {
            Ok(session) => {
                self.apply(ticket, ChangeSource::Refresh, Some(session.clone())).await?;
                debug!(expires_at = %session.expires_at, "refresh: session refreshed");
                Ok(session)
            }
            Err(e) if e.invalidates_session() => {
                warn!(error = %e, "Refresh token rejected; signing out locally");
                self.apply(ticket, ChangeSource::Refresh, None).await?;
                self.fail(ticket, e).await
            }
            Err(e) => self.fail(ticket, e).await,
        }
    }

    /// Email a password-reset link
    pub async fn reset_password_for_email(&self, email: &str) -> SessionResponse<()> {
        debug!(%email, "reset_password_for_email: called");
        let ticket = self.next_ticket();
        self.begin(ticket).await?;
        if let Err(e) = validate_email(email) {
            return self.fail(ticket, e).await;
        }
        match self.provider.reset_password_for_email(email.trim()).await {
            Ok(()) => self.settle(ticket).await,
            Err(e) => self.fail(ticket, e).await,
        }
    }

    /// Set a new password for the signed-in user
    pub async fn update_password(&self, password: &str, confirm: &str) -> SessionResponse<()> {
        debug!("update_password: called");
        let ticket = self.next_ticket();
        self.begin(ticket).await?;
        if let Err(e) = validate_new_password(password, confirm) {
            return self.fail(ticket, e).await;
        }
        let attributes = UserAttributes {
            password: Some(password.to_string()),
            ..Default::default()
        };
        self.update_user(ticket, attributes).await.map(|_| ())
    }

    /// Merge keys into the user's metadata
    pub async fn update_metadata(&self, metadata: Map<String, Value>) -> SessionResponse<Session> {
        debug!(keys = metadata.len(), "update_metadata: called");
        let ticket = self.next_ticket();
        self.begin(ticket).await?;
        let attributes = UserAttributes {
            metadata: Some(metadata),
            ..Default::default()
        };
        self.update_user(ticket, attributes).await
    }

    async fn update_user(&self, ticket: Ticket, attributes: UserAttributes) -> SessionResponse<Session> {
        let current = match self.require_session().await {
            Ok(s) => s,
            Err(e) => return self.fail(ticket, e).await,
        };
        match self.provider.update_user(&current.access_token, attributes).await {
            Ok(user) => {
                let session = Session::from_user(user, current.access_token, current.refresh_token, current.expires_at);
                self.apply(ticket, ChangeSource::UserUpdate, Some(session.clone())).await?;
                Ok(session)
            }
            Err(e) => self.fail(ticket, e).await,
        }
    }

    /// Send the signup confirmation email again
    pub async fn resend_verification(&self, email: &str) -> SessionResponse<()> {
        debug!(%email, "resend_verification: called");
        let ticket = self.next_ticket();
        self.begin(ticket).await?;
        if let Err(e) = validate_email(email) {
            return self.fail(ticket, e).await;
        }
        match self.provider.resend(email.trim(), OtpType::Signup).await {
            Ok(()) => self.settle(ticket).await,
            Err(e) => self.fail(ticket, e).await,
        }
    }

    /// Start an OAuth sign-in; returns the URL the user must open
    pub async fn oauth_sign_in_url(&self, provider: OAuthProvider) -> SessionResponse<String> {
        debug!(%provider, "oauth_sign_in_url: called");
        let pkce = PkcePair::generate();
        self.storage.save_verifier(&pkce.verifier)?;
        Ok(self.provider.authorize_url(provider, &pkce.challenge)?)
    }

    /// Finish an email-link or OAuth redirect
    ///
    /// Returns the resulting session, or `None` when the user should be sent
    /// to the login screen.
    pub async fn handle_callback(&self, params: &CallbackParams) -> SessionResponse<Option<Session>> {
        debug!(?params, "handle_callback: called");
        let ticket = self.next_ticket();
        self.begin(ticket).await?;

        if let Some(err) = params.failure() {
            warn!(error = %err, "Auth callback reported an error");
            return self.fail(ticket, err).await;
        }

        if let Some((token_hash, otp_type)) = params.verification() {
            match self.provider.verify_otp(token_hash, otp_type).await {
                Ok(session) => {
                    self.apply(ticket, ChangeSource::Callback, Some(session.clone())).await?;
                    return Ok(Some(session));
                }
                Err(e) => warn!(error = %e, "Email verification failed"),
            }
        }

        if let Some(code) = &params.code {
            match self.storage.take_verifier()? {
                Some(verifier) => match self.provider.exchange_code(code, &verifier).await {
                    Ok(session) => {
                        self.apply(ticket, ChangeSource::Callback, Some(session.clone())).await?;
                        return Ok(Some(session));
                    }
                    Err(e) => warn!(error = %e, "OAuth code exchange failed"),
                },
                None => warn!(error = %AuthError::MissingVerifier, "OAuth code exchange skipped"),
            }
        }

        self.settle(ticket).await?;
        Ok(self.current().await)
    }

    /// Clear the loading flag without touching the session
    async fn settle(&self, ticket: Ticket) -> SessionResponse<()> {
        self.send(SessionCommand::Finish { ticket }).await
    }

    /// Stop the actor; background tasks exit with it
    pub async fn shutdown(&self) -> SessionResponse<()> {
        debug!("shutdown: called");
        self.send(SessionCommand::Shutdown).await
    }
}

#[async_trait]
impl TokenSource for SessionStore {
    async fn access_token(&self) -> Option<String> {
        self.current().await.map(|s| s.access_token)
    }
}

/// The actor loop that owns the session state
async fn actor_loop(
    mut rx: mpsc::Receiver<SessionCommand>,
    storage: Arc<dyn SessionStorage>,
    change_tx: broadcast::Sender<SessionChange>,
) {
    debug!("SessionStore actor started");
    let mut state = SessionState::default();
    let mut last_applied: Ticket = 0;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            SessionCommand::Begin { ticket } => {
                debug!(ticket, "actor_loop: Begin command");
                if ticket > last_applied {
                    state.is_loading = true;
                    state.error = None;
                }
            }

            SessionCommand::Apply {
                ticket,
                source,
                session,
                reply,
            } => {
                if ticket <= last_applied {
                    debug!(ticket, last_applied, %source, "actor_loop: stale write ignored");
                    let _ = reply.send(false);
                    continue;
                }
                debug!(ticket, %source, "actor_loop: Apply command");
                last_applied = ticket;

                let changed = state.session != session;
                // a restore that fails validation must also drop the stale file
                if changed || source == ChangeSource::Initialize {
                    persist(storage.as_ref(), session.as_ref());
                }
                state.session = session.clone();
                state.is_loading = false;

                if changed {
                    let _ = change_tx.send(SessionChange {
                        ticket,
                        source,
                        session,
                    });
                }
                let _ = reply.send(true);
            }

            SessionCommand::Finish { ticket } => {
                debug!(ticket, "actor_loop: Finish command");
                if ticket > last_applied {
                    state.is_loading = false;
                }
            }

            SessionCommand::Fail { ticket, message } => {
                debug!(ticket, %message, "actor_loop: Fail command");
                if ticket >= last_applied {
                    state.error = Some(message);
                    state.is_loading = false;
                }
            }

            SessionCommand::ClearError => {
                state.error = None;
            }

            SessionCommand::Get { reply } => {
                let _ = reply.send(state.clone());
            }

            SessionCommand::Shutdown => {
                info!("SessionStore shutting down");
                break;
            }
        }
    }

    debug!("SessionStore actor stopped");
}

fn persist(storage: &dyn SessionStorage, session: Option<&Session>) {
    let result = match session {
        Some(session) => storage.save(session),
        None => storage.clear(),
    };
    if let Err(e) = result {
        warn!(error = %e, "Failed to persist session");
    }
}

/// Feed provider auth events into the actor
async fn provider_listener(store: SessionStore, mut rx: broadcast::Receiver<AuthStateChange>) {
    debug!("provider_listener: started");
    loop {
        tokio::select! {
            _ = store.tx.closed() => break,
            msg = rx.recv() => match msg {
                Ok(change) => {
                    let ticket = store.next_ticket();
                    debug!(ticket, event = %change.event, "provider_listener: auth event");
                    if store
                        .apply(ticket, ChangeSource::Provider(change.event), change.session)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!("provider_listener: stopped");
}

/// Refresh the session `margin` before it expires
///
/// A failed refresh is not retried; the loop waits for the next change.
async fn auto_refresh_loop(store: SessionStore, margin: Duration) {
    debug!(margin_secs = margin.num_seconds(), "auto_refresh_loop: started");
    let mut changes = store.subscribe();

    loop {
        let wait = match store.current().await {
            Some(session) => Some((session.expires_at - margin - Utc::now()).to_std().unwrap_or_default()),
            None => None,
        };

        let refresh_due = async {
            match wait {
                Some(wait) => tokio::time::sleep(wait).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = store.tx.closed() => break,
            _ = refresh_due => {
                if let Err(e) = store.refresh().await {
                    warn!(error = %e, "Automatic session refresh failed");
                    // wait for someone else to change the session
                    if let Err(broadcast::error::RecvError::Closed) = changes.recv().await {
                        break;
                    }
                }
            }
            change = changes.recv() => {
                if let Err(broadcast::error::RecvError::Closed) = change {
                    break;
                }
            }
        }
    }
    debug!("auto_refresh_loop: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthEvent;
    use crate::auth::provider::mock::{GOOD_PASSWORD, MockIdentityProvider};
    use crate::session::storage::{FileSessionStorage, MemorySessionStorage};
    use tempfile::tempdir;

    const EMAIL: &str = "user@example.com";

    fn spawn(provider: Arc<MockIdentityProvider>, storage: Arc<dyn SessionStorage>) -> SessionStore {
        SessionStore::spawn(provider, storage, RefreshPolicy::default())
    }

    fn mock() -> Arc<MockIdentityProvider> {
        Arc::new(MockIdentityProvider::new().with_user(EMAIL).with_user("other@example.com"))
    }

    #[tokio::test]
    async fn test_sign_in_sets_session() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));

        let session = store.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();

        let state = store.state().await.unwrap();
        assert_eq!(state.session.unwrap().user_id, session.user_id);
        assert!(!state.is_loading);
        assert!(state.error.is_none());
        assert_eq!(store.access_token().await.as_deref(), Some(session.access_token.as_str()));
    }

    #[tokio::test]
    async fn test_wrong_password_leaves_session_empty() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));

        let err = store.sign_in(EMAIL, "wrong").await.unwrap_err();
        assert!(matches!(err, SessionError::Auth(AuthError::InvalidCredentials)));

        let state = store.state().await.unwrap();
        assert!(state.session.is_none());
        assert_eq!(state.error.as_deref(), Some("Invalid credentials"));
        assert!(!state.is_loading);

        store.clear_error().await.unwrap();
        assert!(store.state().await.unwrap().error.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_then_initialize_on_fresh_store() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("session.json");
        let provider = mock();

        let first = spawn(provider.clone(), Arc::new(FileSessionStorage::new(&path)));
        let session = first.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();
        first.shutdown().await.unwrap();

        let second = spawn(provider, Arc::new(FileSessionStorage::new(&path)));
        let restored = second.initialize_auth().await.unwrap();
        assert_eq!(restored.user_id, session.user_id);
        assert_eq!(second.current().await.unwrap().user_id, session.user_id);
    }

    #[tokio::test]
    async fn test_initialize_without_persisted_session() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        assert!(store.initialize_auth().await.is_none());
        let state = store.state().await.unwrap();
        assert!(state.error.is_none());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_initialize_drops_revoked_session() {
        let provider = mock();
        let storage: Arc<dyn SessionStorage> = Arc::new(MemorySessionStorage::new());
        let first = spawn(provider.clone(), storage.clone());
        first.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();
        provider.revoke_all();

        let second = spawn(provider, storage.clone());
        assert!(second.initialize_auth().await.is_none());
        assert!(storage.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_refreshes_expired_session() {
        let provider = mock();
        let storage: Arc<dyn SessionStorage> = Arc::new(MemorySessionStorage::new());
        let user = crate::domain::AuthUser {
            id: "user-user".to_string(),
            email: EMAIL.to_string(),
            email_verified_at: None,
            user_metadata: Map::new(),
        };
        let expired = provider.issue(&user, Duration::seconds(-10));
        storage.save(&expired).unwrap();

        let store = spawn(provider, storage);
        let restored = store.initialize_auth().await.unwrap();
        assert_ne!(restored.access_token, expired.access_token);
        assert!(!restored.is_expired());
    }

    #[tokio::test]
    async fn test_sign_out_clears_even_if_revoke_fails() {
        let provider = Arc::new(MockIdentityProvider::new().with_user(EMAIL).failing_sign_out());
        let storage: Arc<dyn SessionStorage> = Arc::new(MemorySessionStorage::new());
        let store = spawn(provider.clone(), storage.clone());
        store.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();

        store.sign_out().await.unwrap();

        assert_eq!(provider.sign_out_calls(), 1);
        assert!(store.current().await.is_none());
        assert!(storage.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_later_provider_event_beats_slow_sign_in() {
        let provider = Arc::new(
            MockIdentityProvider::new()
                .with_user(EMAIL)
                .with_user("other@example.com")
                .with_sign_in_delay(std::time::Duration::from_millis(150)),
        );
        let store = spawn(provider.clone(), Arc::new(MemorySessionStorage::new()));
        let mut changes = store.subscribe();

        let slow = {
            let store = store.clone();
            tokio::spawn(async move { store.sign_in(EMAIL, GOOD_PASSWORD).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let other = crate::domain::AuthUser {
            id: "user-other".to_string(),
            email: "other@example.com".to_string(),
            email_verified_at: None,
            user_metadata: Map::new(),
        };
        let pushed = provider.issue(&other, Duration::hours(1));
        provider.emit(AuthEvent::SignedIn, Some(pushed));

        let change = changes.recv().await.unwrap();
        assert_eq!(change.source, ChangeSource::Provider(AuthEvent::SignedIn));

        // sign-in itself succeeds, but its write is stale
        slow.await.unwrap().unwrap();
        assert_eq!(store.current().await.unwrap().user_id, "user-other");
    }

    #[tokio::test]
    async fn test_sign_out_beats_slow_sign_in() {
        let provider = Arc::new(
            MockIdentityProvider::new()
                .with_user(EMAIL)
                .with_sign_in_delay(std::time::Duration::from_millis(150)),
        );
        let storage: Arc<dyn SessionStorage> = Arc::new(MemorySessionStorage::new());
        let store = spawn(provider.clone(), storage.clone());
        let mut provider_events = provider.subscribe();

        let slow = {
            let store = store.clone();
            tokio::spawn(async move { store.sign_in(EMAIL, GOOD_PASSWORD).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        store.sign_out().await.unwrap();

        slow.await.unwrap().unwrap();
        assert!(store.current().await.is_none());
        assert!(storage.load().unwrap().is_none());
        // the provider's own results never come back as events
        assert!(provider_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_ticket_is_ignored() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        let old = store.next_ticket();
        let new = store.next_ticket();

        assert!(store.apply(new, ChangeSource::SignOut, None).await.unwrap());
        let session = store.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();
        assert!(!store.apply(old, ChangeSource::SignOut, None).await.unwrap());

        assert_eq!(store.current().await.unwrap(), session);
    }

    #[tokio::test]
    async fn test_provider_sign_out_event_clears_session() {
        let provider = mock();
        let store = spawn(provider.clone(), Arc::new(MemorySessionStorage::new()));
        store.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();
        let mut changes = store.subscribe();

        provider.emit(AuthEvent::SignedOut, None);

        let change = changes.recv().await.unwrap();
        assert!(change.session.is_none());
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_requiring_confirmation() {
        let provider = Arc::new(MockIdentityProvider::new().requiring_confirmation());
        let store = spawn(provider, Arc::new(MemorySessionStorage::new()));

        let outcome = store.sign_up("new@example.com", "password123", Map::new()).await.unwrap();

        assert_eq!(
            outcome,
            SignUpOutcome::ConfirmationRequired {
                email: "new@example.com".to_string()
            }
        );
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_with_session_is_unverified() {
        let store = spawn(Arc::new(MockIdentityProvider::new()), Arc::new(MemorySessionStorage::new()));
        let mut metadata = Map::new();
        metadata.insert("full_name".to_string(), Value::from("Ada Lovelace"));

        let outcome = store.sign_up("ada@example.com", "password123", metadata).await.unwrap();

        let SignUpOutcome::SignedIn(session) = outcome else {
            panic!("expected a session");
        };
        assert!(!session.is_verified());
        assert_eq!(session.full_name(), Some("Ada Lovelace"));
        assert!(store.current().await.is_some());
    }

    #[tokio::test]
    async fn test_invalid_email_never_reaches_provider() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        let err = store.sign_in("not-an-email", GOOD_PASSWORD).await.unwrap_err();
        assert!(matches!(err, SessionError::Auth(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_password_validates_first() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        store.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();

        let err = store.update_password("password123", "password124").await.unwrap_err();
        assert_eq!(err.to_string(), "Passwords do not match");
        assert!(store.update_password("short", "short").await.is_err());
        store.update_password("password123", "password123").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_password_requires_session() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        let err = store.update_password("password123", "password123").await.unwrap_err();
        assert!(matches!(err, SessionError::Auth(AuthError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_update_metadata_merges() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        store.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();
        let mut metadata = Map::new();
        metadata.insert("full_name".to_string(), Value::from("Grace"));

        let session = store.update_metadata(metadata).await.unwrap();

        assert_eq!(session.full_name(), Some("Grace"));
        assert_eq!(store.current().await.unwrap().full_name(), Some("Grace"));
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        let before = store.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();

        let after = store.refresh().await.unwrap();

        assert_ne!(before.access_token, after.access_token);
        assert_eq!(store.current().await.unwrap().access_token, after.access_token);
    }

    #[tokio::test]
    async fn test_refresh_starts_like_other_operations() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        store.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();
        let _ = store.fail::<()>(store.next_ticket(), AuthError::NotSignedIn).await;
        assert!(store.state().await.unwrap().error.is_some());

        store.refresh().await.unwrap();

        let state = store.state().await.unwrap();
        assert!(state.error.is_none());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_rejected_refresh_signs_out() {
        let provider = mock();
        let store = spawn(provider.clone(), Arc::new(MemorySessionStorage::new()));
        store.sign_in(EMAIL, GOOD_PASSWORD).await.unwrap();
        provider.revoke_all();

        assert!(store.refresh().await.is_err());
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn test_auto_refresh_before_expiry() {
        let provider = mock();
        let store = SessionStore::spawn(
            provider.clone(),
            Arc::new(MemorySessionStorage::new()),
            RefreshPolicy {
                enabled: true,
                margin: Duration::seconds(60),
            },
        );
        let mut changes = store.subscribe();
        let user = crate::domain::AuthUser {
            id: "user-user".to_string(),
            email: EMAIL.to_string(),
            email_verified_at: None,
            user_metadata: Map::new(),
        };
        // already inside the refresh margin
        let short = provider.issue(&user, Duration::seconds(30));
        provider.emit(AuthEvent::SignedIn, Some(short.clone()));

        let first = changes.recv().await.unwrap();
        assert_eq!(first.session.unwrap().access_token, short.access_token);
        let refreshed = tokio::time::timeout(std::time::Duration::from_secs(2), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.source, ChangeSource::Refresh);
        assert_ne!(refreshed.session.unwrap().access_token, short.access_token);
    }

    #[tokio::test]
    async fn test_oauth_round_trip() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));

        let url = store.oauth_sign_in_url(OAuthProvider::Google).await.unwrap();
        assert!(url.contains("provider=google"));

        let params = CallbackParams::parse("code=code-user@example.com").unwrap();
        let session = store.handle_callback(&params).await.unwrap().unwrap();
        assert_eq!(session.email, EMAIL);
    }

    #[tokio::test]
    async fn test_callback_code_without_verifier_goes_to_login() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        let params = CallbackParams::parse("code=code-user@example.com").unwrap();
        assert!(store.handle_callback(&params).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_callback_verifies_email_link() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        let params = CallbackParams::parse("token_hash=hash-user@example.com&type=signup").unwrap();

        let session = store.handle_callback(&params).await.unwrap().unwrap();

        assert!(session.is_verified());
        assert_eq!(store.current().await.unwrap().user_id, session.user_id);
    }

    #[tokio::test]
    async fn test_callback_bad_link_falls_through() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        let params = CallbackParams::parse("token_hash=bogus&type=recovery").unwrap();
        assert!(store.handle_callback(&params).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_callback_error_params() {
        let store = spawn(mock(), Arc::new(MemorySessionStorage::new()));
        let params = CallbackParams::parse("error=access_denied&error_description=Denied").unwrap();

        let err = store.handle_callback(&params).await.unwrap_err();

        assert!(matches!(err, SessionError::Auth(AuthError::Callback { .. })));
        assert_eq!(
            store.state().await.unwrap().error.as_deref(),
            Some("Authentication failed: Denied")
        );
    }
}
