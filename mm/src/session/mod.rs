//! Session management with actor pattern
//!
//! SessionStore owns the authenticated session and serializes every write
//! to it, whether it comes from a local call or the identity provider.

mod callback;
mod manager;
mod messages;
mod storage;

pub use callback::CallbackParams;
pub use manager::{RefreshPolicy, SessionStore};
pub use messages::{ChangeSource, SessionChange, SessionCommand, SessionError, SessionResponse, SessionState, Ticket};
pub use storage::{FileSessionStorage, MemorySessionStorage, SessionStorage};
