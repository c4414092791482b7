//! Mindmesh - client state layer for the Mindmesh note organizer
//!
//! Mindmesh turns scattered thoughts into plans and tasks with help from an
//! AI organizer. This crate is the client side of that: who is signed in,
//! how requests reach the backend, and what the dashboard currently shows.
//!
//! # Core Concepts
//!
//! - **One writer per session**: every session change goes through one actor,
//!   ordered by the ticket drawn when the operation was issued
//! - **Backend is the source of truth**: the plan store only mirrors what the
//!   backend confirmed
//! - **No retries**: every call is a single attempt; failures become messages
//!
//! # Modules
//!
//! - [`auth`] - Identity provider trait and GoTrue implementation
//! - [`session`] - Session actor, persistence and auth callbacks
//! - [`api`] - Backend REST client
//! - [`store`] - Plan/task cache driving the dashboard
//! - [`domain`] - Plans, tasks, sessions and AI payloads
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod domain;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use api::{ApiClient, ApiError, PlanApi, TokenSource};
pub use auth::{AuthError, GoTrueClient, IdentityProvider};
pub use config::{Config, ConfigError};
pub use domain::{Plan, PlanStatus, Session, Task, TaskStatus};
pub use session::{SessionError, SessionStore};
pub use store::{PlanStore, PlanStoreState, StoreEvent};
