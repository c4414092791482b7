//! Session actor messages
//!
//! Commands and change notifications for the session actor.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::auth::{AuthError, AuthEvent};
use crate::domain::Session;

/// Errors from session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Channel error")]
    ChannelError,
}

impl SessionError {
    /// Message suitable for the `error` field shown to the user
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// Response from session operations
pub type SessionResponse<T> = Result<T, SessionError>;

/// Sequence number drawn when a session operation is issued
pub type Ticket = u64;

/// What produced a session write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    SignIn,
    SignUp,
    SignOut,
    Initialize,
    Refresh,
    Callback,
    UserUpdate,
    /// Pushed by the identity provider's event stream
    Provider(AuthEvent),
}

impl std::fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignIn => write!(f, "sign-in"),
            Self::SignUp => write!(f, "sign-up"),
            Self::SignOut => write!(f, "sign-out"),
            Self::Initialize => write!(f, "initialize"),
            Self::Refresh => write!(f, "refresh"),
            Self::Callback => write!(f, "callback"),
            Self::UserUpdate => write!(f, "user-update"),
            Self::Provider(event) => write!(f, "provider:{}", event),
        }
    }
}

/// Broadcast after every applied session write
#[derive(Debug, Clone)]
pub struct SessionChange {
    pub ticket: Ticket,
    pub source: ChangeSource,
    pub session: Option<Session>,
}

/// Observable session state
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub session: Option<Session>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Commands sent to the session actor
#[derive(Debug)]
pub enum SessionCommand {
    /// An operation started: mark loading and clear the error
    Begin { ticket: Ticket },

    /// Write the session if `ticket` is newer than the last applied one
    Apply {
        ticket: Ticket,
        source: ChangeSource,
        session: Option<Session>,
        reply: oneshot::Sender<bool>,
    },

    /// An operation finished without writing the session
    Finish { ticket: Ticket },

    /// An operation failed; the session is left as it is
    Fail { ticket: Ticket, message: String },

    ClearError,

    Get {
        reply: oneshot::Sender<SessionState>,
    },

    Shutdown,
}
