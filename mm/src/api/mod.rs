//! Backend REST API access
//!
//! [`PlanApi`] is the seam the plan store talks to; [`ApiClient`] is the
//! HTTP implementation, authenticated through a [`TokenSource`].

pub mod client;
mod error;

pub use client::{ApiClient, HealthStatus, MAX_HISTORY_LIMIT, NoToken, PlanApi, TokenSource, api_base_url, endpoint};
pub use error::ApiError;
