//! Domain types for Mindmesh
//!
//! Plans, tasks, sessions and the AI organizer payloads. Plans and tasks are
//! owned by the backend; these are the client's mirrors of them.

mod ai;
mod plan;
mod session;
mod task;
pub mod timestamp;

pub use ai::{
    AiInteraction, AiPayloadError, ApprovalOutcome, ApprovalRequest, DashboardCategory, DashboardData,
    DashboardGeneration, DashboardSuggestion, OrganizedCategory, OrganizedPrompt, OrganizedTask, PriorityAnalysis,
    PriorityGroups, ScoredTask, StatusBuckets, SuggestionMetadata, TaskRef, parse_dashboard_data, parse_generation,
    parse_organized, priority_histogram,
};
pub use plan::{MAX_DESCRIPTION_CHARS, MAX_TITLE_CHARS, Plan, PlanCreate, PlanStatus, PlanUpdate};
pub use session::{AuthUser, Session};
pub use task::{
    DEFAULT_CATEGORY, DEFAULT_PRIORITY, MAX_AI_SCORE, MAX_PRIORITY, MIN_PRIORITY, Task, TaskCreate, TaskStatus,
    TaskUpdate, group_by_category,
};
