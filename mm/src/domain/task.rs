//! Task domain type
//!
//! Tasks reference their plan by id only. The client never checks that the
//! plan exists; it trusts the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

use super::plan::{validate_description, validate_title};

/// Bucket for tasks the AI organizer has not categorized
pub const DEFAULT_CATEGORY: &str = "uncategorized";

/// Lowest user-facing priority
pub const MIN_PRIORITY: u8 = 1;

/// Highest user-facing priority
pub const MAX_PRIORITY: u8 = 5;

/// Priority used when none is given
pub const DEFAULT_PRIORITY: u8 = 3;

/// Upper bound of the AI priority score scale
pub const MAX_AI_SCORE: u8 = 10;

/// Task progress status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" | "done" => Ok(Self::Completed),
            other => Err(format!(
                "Unknown task status '{}'. Expected one of: pending, in_progress, completed",
                other
            )),
        }
    }
}

/// A task as confirmed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    /// Weak reference to the owning plan
    pub plan_id: String,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    /// User-assigned priority (1-5)
    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default)]
    pub ai_category: Option<String>,

    /// AI-assigned score (0-10)
    #[serde(default)]
    pub ai_priority_score: Option<u8>,

    #[serde(default)]
    pub ai_reasoning: Option<String>,

    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "super::timestamp")]
    pub updated_at: DateTime<Utc>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl Task {
    /// Category bucket this task is displayed under
    pub fn category(&self) -> &str {
        match self.ai_category.as_deref() {
            Some(c) if !c.trim().is_empty() => c,
            _ => DEFAULT_CATEGORY,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Group tasks by AI category
///
/// Tasks without a category land in [`DEFAULT_CATEGORY`]. Each bucket is
/// ordered by AI priority score, highest first; unscored tasks sort as 0.
pub fn group_by_category(tasks: &[Task]) -> BTreeMap<String, Vec<Task>> {
    debug!(task_count = tasks.len(), "group_by_category: called");
    let mut groups: BTreeMap<String, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.category().to_string()).or_default().push(task.clone());
    }
    for bucket in groups.values_mut() {
        // stable: equal scores keep backend order
        bucket.sort_by(|a, b| b.ai_priority_score.unwrap_or(0).cmp(&a.ai_priority_score.unwrap_or(0)));
    }
    groups
}

/// Request body for creating a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCreate {
    pub plan_id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_priority")]
    pub priority: u8,
}

impl TaskCreate {
    pub fn new(plan_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            title: title.into(),
            description: None,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.plan_id.trim().is_empty() {
            return Err("Plan id is required".to_string());
        }
        validate_title(&self.title)?;
        validate_description(self.description.as_deref())?;
        validate_priority(self.priority)
    }
}

/// Partial update for a task; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_priority_score: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_reasoning: Option<String>,
}

impl TaskUpdate {
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        validate_description(self.description.as_deref())?;
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        match self.ai_priority_score {
            Some(score) if score > MAX_AI_SCORE => Err(format!("AI priority score must be at most {}", MAX_AI_SCORE)),
            _ => Ok(()),
        }
    }
}

fn validate_priority(priority: u8) -> Result<(), String> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(())
    } else {
        Err(format!(
            "Priority must be between {} and {}",
            MIN_PRIORITY, MAX_PRIORITY
        ))
    }
}
