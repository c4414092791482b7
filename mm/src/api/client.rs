//! Backend REST client
//!
//! [`PlanApi`] is the seam the plan store depends on; [`ApiClient`] implements
//! it over HTTP. Every request carries the bearer token of the current session
//! when there is one. Single attempt per call, no retries.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::ApiError;
use crate::config::ApiConfig;
use crate::domain::{
    AiInteraction, ApprovalOutcome, ApprovalRequest, DashboardGeneration, OrganizedPrompt, Plan, PlanCreate,
    PlanUpdate, Task, TaskCreate, TaskUpdate, parse_generation, parse_organized,
};

/// Largest page the interaction history endpoint serves
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Supplies the access token for outgoing requests
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// Token source for anonymous calls
pub struct NoToken;

#[async_trait]
impl TokenSource for NoToken {
    async fn access_token(&self) -> Option<String> {
        None
    }
}

/// Body of `GET /api/health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Plan, task and AI operations of the backend
#[async_trait]
pub trait PlanApi: Send + Sync {
    async fn list_plans(&self) -> Result<Vec<Plan>, ApiError>;

    async fn get_plan(&self, id: &str) -> Result<Plan, ApiError>;

    async fn create_plan(&self, plan: &PlanCreate) -> Result<Plan, ApiError>;

    async fn update_plan(&self, id: &str, update: &PlanUpdate) -> Result<Plan, ApiError>;

    async fn delete_plan(&self, id: &str) -> Result<(), ApiError>;

    /// All of the user's tasks, or only those of `plan_id`
    async fn list_tasks(&self, plan_id: Option<&str>) -> Result<Vec<Task>, ApiError>;

    async fn get_task(&self, id: &str) -> Result<Task, ApiError>;

    async fn create_task(&self, task: &TaskCreate) -> Result<Task, ApiError>;

    async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Task, ApiError>;

    async fn delete_task(&self, id: &str) -> Result<(), ApiError>;

    /// Ask the AI organizer for a dashboard suggestion
    ///
    /// One request, one response. Re-fetch the plan afterwards to see what
    /// was stored.
    async fn generate_dashboard(&self, plan_id: &str) -> Result<DashboardGeneration, ApiError>;

    async fn approve_dashboard(
        &self,
        interaction_id: &str,
        request: &ApprovalRequest,
    ) -> Result<ApprovalOutcome, ApiError>;

    async fn interaction_history(
        &self,
        plan_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<AiInteraction>, ApiError>;

    async fn organize_prompt(&self, prompt: &str) -> Result<OrganizedPrompt, ApiError>;

    async fn health(&self) -> Result<HealthStatus, ApiError>;
}

/// HTTP client for the Mindmesh backend
pub struct ApiClient {
    base_url: Url,
    http: Client,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    /// Create a new client from configuration
    pub fn from_config(config: &ApiConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, ApiError> {
        debug!(?config, "from_config: called");
        let base_url = api_base_url(&config.base_url)?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(ApiError::Network)?;
        Ok(Self { base_url, http, tokens })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ApiError> {
        endpoint(&self.base_url, path, query)
    }

    async fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("content-type", "application/json");
        match self.tokens.access_token().await {
            Some(token) => builder.bearer_auth(token),
            None => {
                debug!("request: no session, sending unauthenticated");
                builder
            }
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = check(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        check(builder.send().await?).await?;
        Ok(())
    }
}

/// `{base-url}/api/` with the trailing slash `Url::join` needs
pub fn api_base_url(base_url: &str) -> Result<Url, ApiError> {
    let trimmed = base_url.trim_end_matches('/');
    Url::parse(&format!("{}/api/", trimmed))
        .map_err(|e| ApiError::Validation(format!("Invalid API URL '{}': {}", base_url, e)))
}

/// Join a route onto the API base and append query pairs
pub fn endpoint(base: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url, ApiError> {
    let mut url = base
        .join(path.trim_start_matches('/'))
        .map_err(|e| ApiError::Validation(format!("Invalid API path '{}': {}", path, e)))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Path segment for a resource id
fn resource(collection: &str, id: &str) -> Result<String, ApiError> {
    if id.trim().is_empty() || id.contains('/') {
        return Err(ApiError::Validation(format!("Invalid id '{}'", id)));
    }
    Ok(format!("{}/{}", collection, id))
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    // Missing or non-JSON body falls back to the status line
    let body: Value = response.json().await.unwrap_or_else(|_| json!({}));
    debug!(status = status.as_u16(), ?body, "check: error response");
    Err(ApiError::from_response(status.as_u16(), status.canonical_reason(), &body))
}

#[async_trait]
impl PlanApi for ApiClient {
    async fn list_plans(&self) -> Result<Vec<Plan>, ApiError> {
        debug!("list_plans: called");
        let url = self.url("plans", &[])?;
        self.send(self.request(Method::GET, url).await).await
    }

    async fn get_plan(&self, id: &str) -> Result<Plan, ApiError> {
        debug!(%id, "get_plan: called");
        let url = self.url(&resource("plans", id)?, &[])?;
        self.send(self.request(Method::GET, url).await).await
    }

    async fn create_plan(&self, plan: &PlanCreate) -> Result<Plan, ApiError> {
        debug!(title = %plan.title, "create_plan: called");
        plan.validate().map_err(ApiError::Validation)?;
        let url = self.url("plans", &[])?;
        let created: Plan = self.send(self.request(Method::POST, url).await.json(plan)).await?;
        info!(plan_id = %created.id, "Created plan");
        Ok(created)
    }

    async fn update_plan(&self, id: &str, update: &PlanUpdate) -> Result<Plan, ApiError> {
        debug!(%id, ?update, "update_plan: called");
        update.validate().map_err(ApiError::Validation)?;
        let url = self.url(&resource("plans", id)?, &[])?;
        self.send(self.request(Method::PUT, url).await.json(update)).await
    }

    async fn delete_plan(&self, id: &str) -> Result<(), ApiError> {
        debug!(%id, "delete_plan: called");
        let url = self.url(&resource("plans", id)?, &[])?;
        self.send_empty(self.request(Method::DELETE, url).await).await?;
        info!(plan_id = %id, "Deleted plan");
        Ok(())
    }

    async fn list_tasks(&self, plan_id: Option<&str>) -> Result<Vec<Task>, ApiError> {
        debug!(?plan_id, "list_tasks: called");
        let query: Vec<(&str, &str)> = plan_id.map(|id| ("plan_id", id)).into_iter().collect();
        let url = self.url("tasks", &query)?;
        self.send(self.request(Method::GET, url).await).await
    }

    async fn get_task(&self, id: &str) -> Result<Task, ApiError> {
        debug!(%id, "get_task: called");
        let url = self.url(&resource("tasks", id)?, &[])?;
        self.send(self.request(Method::GET, url).await).await
    }

    async fn create_task(&self, task: &TaskCreate) -> Result<Task, ApiError> {
        debug!(plan_id = %task.plan_id, title = %task.title, "create_task: called");
        task.validate().map_err(ApiError::Validation)?;
        let url = self.url("tasks", &[])?;
        self.send(self.request(Method::POST, url).await.json(task)).await
    }

    async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Task, ApiError> {
        debug!(%id, ?update, "update_task: called");
        update.validate().map_err(ApiError::Validation)?;
        let url = self.url(&resource("tasks", id)?, &[])?;
        self.send(self.request(Method::PUT, url).await.json(update)).await
    }

    async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        debug!(%id, "delete_task: called");
        let url = self.url(&resource("tasks", id)?, &[])?;
        self.send_empty(self.request(Method::DELETE, url).await).await
    }

    async fn generate_dashboard(&self, plan_id: &str) -> Result<DashboardGeneration, ApiError> {
        debug!(%plan_id, "generate_dashboard: called");
        let url = self.url("ai/generate-dashboard", &[("plan_id", plan_id)])?;
        let body: Value = self.send(self.request(Method::POST, url).await).await?;
        let generation = parse_generation(body)?;
        info!(%plan_id, interaction_id = ?generation.interaction_id, "Dashboard suggestion generated");
        Ok(generation)
    }

    async fn approve_dashboard(
        &self,
        interaction_id: &str,
        request: &ApprovalRequest,
    ) -> Result<ApprovalOutcome, ApiError> {
        debug!(%interaction_id, approved = request.approved, "approve_dashboard: called");
        if interaction_id.trim().is_empty() {
            return Err(ApiError::Validation("No dashboard suggestion to approve".to_string()));
        }
        let url = self.url("ai/approve-dashboard", &[("interaction_id", interaction_id)])?;
        self.send(self.request(Method::POST, url).await.json(request)).await
    }

    async fn interaction_history(
        &self,
        plan_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<AiInteraction>, ApiError> {
        debug!(?plan_id, ?limit, "interaction_history: called");
        if let Some(limit) = limit
            && !(1..=MAX_HISTORY_LIMIT).contains(&limit)
        {
            return Err(ApiError::Validation(format!(
                "History limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }
        let limit = limit.map(|l| l.to_string());
        let mut query = Vec::new();
        if let Some(plan_id) = plan_id {
            query.push(("plan_id", plan_id));
        }
        if let Some(limit) = limit.as_deref() {
            query.push(("limit", limit));
        }
        let url = self.url("ai/interaction-history", &query)?;
        self.send(self.request(Method::GET, url).await).await
    }

    async fn organize_prompt(&self, prompt: &str) -> Result<OrganizedPrompt, ApiError> {
        debug!(prompt_len = prompt.len(), "organize_prompt: called");
        if prompt.trim().is_empty() {
            return Err(ApiError::Validation("Prompt is required".to_string()));
        }
        let url = self.url("ai/organize-prompt", &[])?;
        let body: Value = self
            .send(self.request(Method::POST, url).await.json(&json!({"prompt": prompt})))
            .await?;
        Ok(parse_organized(body)?)
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        debug!("health: called");
        let url = self.url("health", &[])?;
        self.send(self.request(Method::GET, url).await).await
    }
}
