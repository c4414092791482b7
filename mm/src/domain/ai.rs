//! AI organizer payloads
//!
//! The backend relays language-model output, so every shape here is parsed
//! and checked once, where it enters the client. Anything that does not fit
//! is rejected as [`AiPayloadError::Malformed`] instead of leaking half-filled
//! values into the views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use super::task::MAX_AI_SCORE;

/// Errors decoding AI payloads
#[derive(Debug, Error, PartialEq)]
pub enum AiPayloadError {
    #[error("Malformed AI response: {0}")]
    Malformed(String),

    #[error("AI request failed: {0}")]
    Rejected(String),
}

/// Envelope the backend wraps analysis results in
#[derive(Debug, Clone, Deserialize)]
struct AnalysisEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    interaction_id: Option<String>,
}

/// Reference to a task inside an AI category: an id, or an index into the
/// plan's task list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskRef {
    Index(u64),
    Id(String),
}

/// A category proposed for a plan's dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardCategory {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tasks: Vec<TaskRef>,

    #[serde(default)]
    pub priority_ranking: Option<u8>,
}

/// Task references bucketed by urgency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityGroups {
    pub critical: Vec<TaskRef>,
    pub high: Vec<TaskRef>,
    pub medium: Vec<TaskRef>,
    pub low: Vec<TaskRef>,
}

/// The organized dashboard; also what approval stores on `Plan.ai_generated_data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    pub dashboard_title: String,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub categories: Vec<DashboardCategory>,

    #[serde(default)]
    pub priority_groups: PriorityGroups,

    #[serde(default)]
    pub recommendations: Vec<String>,

    #[serde(default)]
    pub estimated_completion_time: Option<String>,

    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl DashboardData {
    fn validate(&self) -> Result<(), AiPayloadError> {
        if self.dashboard_title.trim().is_empty() {
            return Err(AiPayloadError::Malformed("dashboard_title is empty".to_string()));
        }
        if let Some(idx) = self.categories.iter().position(|c| c.name.trim().is_empty()) {
            return Err(AiPayloadError::Malformed(format!("category #{} has no name", idx)));
        }
        if let Some(c) = self
            .categories
            .iter()
            .find(|c| c.priority_ranking.is_some_and(|r| !(1..=5).contains(&r)))
        {
            return Err(AiPayloadError::Malformed(format!(
                "category '{}' has priority_ranking outside 1-5",
                c.name
            )));
        }
        Ok(())
    }
}

/// Per-task scoring produced by the priority pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTask {
    pub id: String,

    #[serde(default)]
    pub ai_category: Option<String>,

    #[serde(default)]
    pub ai_priority_score: Option<u8>,

    #[serde(default)]
    pub ai_reasoning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityAnalysis {
    pub scored_tasks: Vec<ScoredTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionMetadata {
    pub total_tasks: u32,
    pub categorized_tasks: u32,
    pub response_time_ms: u64,
    pub model_used: Option<String>,
}

/// Dashboard suggestion awaiting the user's approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSuggestion {
    pub plan_id: String,

    #[serde(default)]
    pub plan_title: String,

    pub dashboard_data: DashboardData,

    #[serde(default)]
    pub priority_analysis: PriorityAnalysis,

    #[serde(default)]
    pub metadata: SuggestionMetadata,
}

impl DashboardSuggestion {
    fn validate(&self) -> Result<(), AiPayloadError> {
        self.dashboard_data.validate()?;
        if let Some(t) = self
            .priority_analysis
            .scored_tasks
            .iter()
            .find(|t| t.ai_priority_score.is_some_and(|s| s > MAX_AI_SCORE))
        {
            return Err(AiPayloadError::Malformed(format!(
                "task {} has ai_priority_score above {}",
                t.id, MAX_AI_SCORE
            )));
        }
        Ok(())
    }
}

/// Result of a dashboard generation call
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardGeneration {
    /// Needed to approve or reject the suggestion
    pub interaction_id: Option<String>,
    pub suggestion: DashboardSuggestion,
}

/// Approval decision sent back for a suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub approved: bool,

    #[serde(default)]
    pub plan_id: Option<String>,
}

/// One task extracted from free text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizedTask {
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// 1-3 low, 4-6 medium, 7-8 high, 9-10 critical
    #[serde(default)]
    pub priority: u8,

    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusBuckets {
    pub todo: Vec<OrganizedTask>,
    pub doing: Vec<OrganizedTask>,
    pub upcoming: Vec<OrganizedTask>,
}

impl StatusBuckets {
    pub fn len(&self) -> usize {
        self.todo.len() + self.doing.len() + self.upcoming.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks in board order: todo, doing, upcoming
    pub fn iter(&self) -> impl Iterator<Item = &OrganizedTask> {
        self.todo.iter().chain(self.doing.iter()).chain(self.upcoming.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizedCategory {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub icon: String,

    #[serde(default)]
    pub color: String,

    #[serde(default)]
    pub tasks: StatusBuckets,
}

/// Free text organized into categories with todo/doing/upcoming buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizedPrompt {
    pub categories: Vec<OrganizedCategory>,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub total_tasks: u32,

    #[serde(default)]
    pub suggested_next_steps: Vec<String>,
}

impl OrganizedPrompt {
    /// Count of tasks actually present, regardless of `total_tasks`
    pub fn task_count(&self) -> usize {
        self.categories.iter().map(|c| c.tasks.len()).sum()
    }

    fn validate(&self) -> Result<(), AiPayloadError> {
        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(AiPayloadError::Malformed("category without a name".to_string()));
            }
            if let Some(task) = category.tasks.iter().find(|t| t.title.trim().is_empty()) {
                return Err(AiPayloadError::Malformed(format!(
                    "task without a title in category '{}' ({:?})",
                    category.name, task.description
                )));
            }
            if let Some(task) = category.tasks.iter().find(|t| t.priority > MAX_AI_SCORE) {
                return Err(AiPayloadError::Malformed(format!(
                    "task '{}' has priority above {}",
                    task.title, MAX_AI_SCORE
                )));
            }
        }
        Ok(())
    }
}

/// A past AI call, as listed by the interaction history endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInteraction {
    pub id: String,

    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub plan_id: String,

    pub interaction_type: String,

    #[serde(default)]
    pub tokens_used: Option<u64>,

    #[serde(default)]
    pub cost_estimate: Option<f64>,

    #[serde(default)]
    pub model_used: Option<String>,

    #[serde(default)]
    pub response_time_ms: Option<u64>,

    #[serde(default)]
    pub user_feedback: Option<u8>,

    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,
}

fn malformed(e: serde_json::Error) -> AiPayloadError {
    AiPayloadError::Malformed(e.to_string())
}

/// Decode the body of `POST /api/ai/generate-dashboard`
pub fn parse_generation(body: Value) -> Result<DashboardGeneration, AiPayloadError> {
    debug!("parse_generation: called");
    let envelope: AnalysisEnvelope = serde_json::from_value(body).map_err(malformed)?;

    if !envelope.success {
        debug!(error = ?envelope.error, "parse_generation: backend reported failure");
        return Err(AiPayloadError::Rejected(
            envelope.error.unwrap_or_else(|| "AI analysis failed".to_string()),
        ));
    }

    let data = envelope
        .data
        .ok_or_else(|| AiPayloadError::Malformed("missing data".to_string()))?;
    let suggestion: DashboardSuggestion = serde_json::from_value(data).map_err(malformed)?;
    suggestion.validate()?;

    Ok(DashboardGeneration {
        interaction_id: envelope.interaction_id,
        suggestion,
    })
}

/// Decode the dashboard blob stored on a plan
pub fn parse_dashboard_data(raw: &str) -> Result<DashboardData, AiPayloadError> {
    debug!(len = raw.len(), "parse_dashboard_data: called");
    let data: DashboardData = serde_json::from_str(raw).map_err(malformed)?;
    data.validate()?;
    Ok(data)
}

/// Decode the body of `POST /api/ai/organize-prompt`
pub fn parse_organized(body: Value) -> Result<OrganizedPrompt, AiPayloadError> {
    debug!("parse_organized: called");
    let organized: OrganizedPrompt = serde_json::from_value(body).map_err(malformed)?;
    organized.validate()?;
    Ok(organized)
}

/// Count task references per urgency bucket, for summaries
pub fn priority_histogram(groups: &PriorityGroups) -> BTreeMap<&'static str, usize> {
    BTreeMap::from([
        ("critical", groups.critical.len()),
        ("high", groups.high.len()),
        ("medium", groups.medium.len()),
        ("low", groups.low.len()),
    ])
}
