//! Plan and task state for dashboard views
//!
//! PlanStore caches what the backend confirmed and broadcasts a StoreEvent
//! after every change so views know when to re-render.

mod plan_store;

pub use plan_store::{PlanStore, PlanStoreState, StoreEvent};
