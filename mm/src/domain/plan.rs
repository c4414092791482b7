//! Plan domain type
//!
//! A plan is a user-defined goal that groups tasks. The backend owns its
//! identity and lifecycle; the client only mirrors what the backend confirms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use super::ai::{AiPayloadError, DashboardData, parse_dashboard_data};

/// Maximum plan title length accepted by the backend
pub const MAX_TITLE_CHARS: usize = 200;

/// Maximum plan/task description length accepted by the backend
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Plan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Newly created, not yet organized
    #[default]
    Draft,
    /// AI dashboard approved and applied
    Active,
    /// Accepted by the user
    Accepted,
    /// Hidden from the dashboard
    Archived,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Accepted => write!(f, "accepted"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "PlanStatus::from_str: called");
        match s.to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "accepted" => Ok(Self::Accepted),
            "archived" => Ok(Self::Archived),
            other => Err(format!(
                "Unknown plan status '{}'. Expected one of: draft, active, accepted, archived",
                other
            )),
        }
    }
}

/// A plan as confirmed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Backend-generated identifier
    pub id: String,

    /// Owning user
    pub user_id: String,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub status: PlanStatus,

    /// The free-text thought the plan was created from
    #[serde(default)]
    pub original_thought: Option<String>,

    /// Serialized dashboard written by the AI organizer after approval
    #[serde(default)]
    pub ai_generated_data: Option<String>,

    /// Serialized AI bookkeeping, opaque to the client
    #[serde(default)]
    pub ai_metadata: Option<String>,

    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "super::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Whether the AI organizer has written a dashboard onto this plan
    pub fn has_ai_data(&self) -> bool {
        self.ai_generated_data.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    /// Decode the AI dashboard blob, if present
    pub fn ai_dashboard(&self) -> Result<Option<DashboardData>, AiPayloadError> {
        debug!(plan_id = %self.id, "ai_dashboard: called");
        match self.ai_generated_data.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_dashboard_data(raw).map(Some),
            _ => Ok(None),
        }
    }
}

/// Request body for creating a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCreate {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_thought: Option<String>,

    /// Omitted means the backend default (`draft`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PlanStatus>,
}

impl PlanCreate {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            title: title.into(),
            description: if description.is_empty() { None } else { Some(description) },
            original_thought: None,
            status: None,
        }
    }

    pub fn with_original_thought(mut self, thought: impl Into<String>) -> Self {
        self.original_thought = Some(thought.into());
        self
    }

    pub fn with_status(mut self, status: PlanStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Check the same length limits the backend enforces
    pub fn validate(&self) -> Result<(), String> {
        validate_title(&self.title)?;
        validate_description(self.description.as_deref())
    }
}

/// Partial update for a plan; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PlanStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_thought: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_generated_data: Option<String>,
}

impl PlanUpdate {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn status(mut self, status: PlanStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        validate_description(self.description.as_deref())
    }
}

pub(crate) fn validate_title(title: &str) -> Result<(), String> {
    let len = title.trim().chars().count();
    if len == 0 {
        return Err("Title is required".to_string());
    }
    if len > MAX_TITLE_CHARS {
        return Err(format!("Title must be at most {} characters", MAX_TITLE_CHARS));
    }
    Ok(())
}

pub(crate) fn validate_description(description: Option<&str>) -> Result<(), String> {
    match description {
        Some(d) if d.chars().count() > MAX_DESCRIPTION_CHARS => Err(format!(
            "Description must be at most {} characters",
            MAX_DESCRIPTION_CHARS
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_json() -> serde_json::Value {
        serde_json::json!({
            "id": "0b7e3c9a-1111-4c1d-9a55-7d3f0e2b6a01",
            "user_id": "user-1",
            "title": "Launch blog",
            "description": "Write and ship",
            "status": "draft",
            "created_at": "2024-05-01T12:00:00.000001",
            "updated_at": "2024-05-01T12:00:00Z"
        })
    }

    #[test]
    fn test_deserialize_backend_plan() {
        let plan: Plan = serde_json::from_value(plan_json()).unwrap();
        assert_eq!(plan.title, "Launch blog");
        assert_eq!(plan.status, PlanStatus::Draft);
        assert!(plan.original_thought.is_none());
        assert!(!plan.has_ai_data());
        assert!(plan.ai_dashboard().unwrap().is_none());
    }

    #[test]
    fn test_status_round_trips_snake_case() {
        assert_eq!(serde_json::to_string(&PlanStatus::Archived).unwrap(), "\"archived\"");
        assert_eq!("Active".parse::<PlanStatus>().unwrap(), PlanStatus::Active);
        assert!("bogus".parse::<PlanStatus>().is_err());
    }

    #[test]
    fn test_plan_create_omits_status_by_default() {
        let body = serde_json::to_value(PlanCreate::new("X", "Y")).unwrap();
        assert_eq!(body["title"], "X");
        assert_eq!(body["description"], "Y");
        assert!(body.get("status").is_none());
        assert!(body.get("original_thought").is_none());

        let body = serde_json::to_value(PlanCreate::new("X", "").with_status(PlanStatus::Active)).unwrap();
        assert_eq!(body["status"], "active");
        assert!(body.get("description").is_none());
    }

    #[test]
    fn test_plan_create_validation() {
        assert!(PlanCreate::new("ok", "fine").validate().is_ok());
        assert!(PlanCreate::new("   ", "").validate().is_err());
        assert!(PlanCreate::new("t".repeat(201), "").validate().is_err());
        assert!(PlanCreate::new("t", "d".repeat(1001)).validate().is_err());
    }

    #[test]
    fn test_plan_update_serializes_only_set_fields() {
        let update = PlanUpdate::default().status(PlanStatus::Accepted);
        let body = serde_json::to_value(&update).unwrap();
        assert_eq!(body, serde_json::json!({"status": "accepted"}));
        assert!(!update.is_empty());
        assert!(PlanUpdate::default().is_empty());
    }

    #[test]
    fn test_malformed_ai_blob_is_reported() {
        let mut plan: Plan = serde_json::from_value(plan_json()).unwrap();
        plan.ai_generated_data = Some("{not json".to_string());
        assert!(plan.has_ai_data());
        assert!(matches!(plan.ai_dashboard(), Err(AiPayloadError::Malformed(_))));
    }
}
