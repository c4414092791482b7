//! PlanStore - client-side cache of plans and tasks
//!
//! Actions follow one shape: mark loading, await the backend, then merge the
//! confirmed result. Nothing is held locked across a network call. Every
//! action remembers the epoch it started in and drops its result if a
//! `reset()` happened in the meantime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::api::{ApiError, PlanApi};
use crate::domain::{
    AiInteraction, ApprovalRequest, DashboardGeneration, OrganizedPrompt, Plan, PlanCreate, PlanUpdate, Task,
    TaskCreate, TaskUpdate, group_by_category,
};

/// Capacity of the event broadcast
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything a view renders from
#[derive(Debug, Clone, Default)]
pub struct PlanStoreState {
    pub plans: Vec<Plan>,
    pub tasks: Vec<Task>,
    pub current_plan: Option<Plan>,
    pub is_loading: bool,
    pub is_generating_ai: bool,
    /// Message of the last failed action
    pub error: Option<String>,
    /// Most recent dashboard suggestion and its interaction id
    pub last_suggestion: Option<DashboardGeneration>,
    pub interactions: Vec<AiInteraction>,
}

/// Notification sent after each mutation of the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    PlansLoaded { count: usize },
    PlanLoaded { plan_id: String },
    PlanCreated { plan_id: String },
    PlanUpdated { plan_id: String },
    PlanDeleted { plan_id: String },
    CurrentPlanChanged { plan_id: Option<String> },
    TasksLoaded { count: usize },
    TaskCreated { task_id: String },
    TaskUpdated { task_id: String },
    TaskDeleted { task_id: String },
    SuggestionReady { plan_id: String },
    SuggestionReviewed { plan_id: Option<String>, approved: bool },
    HistoryLoaded { count: usize },
    Failed { message: String },
    ErrorCleared,
    Reset,
}

/// Progress flag an action raises while it waits on the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Busy {
    Loading,
    GeneratingAi,
}

impl Busy {
    fn set(self, state: &mut PlanStoreState, on: bool) {
        match self {
            Busy::Loading => state.is_loading = on,
            Busy::GeneratingAi => state.is_generating_ai = on,
        }
    }
}

/// Shared handle to the plan/task cache
#[derive(Clone)]
pub struct PlanStore {
    api: Arc<dyn PlanApi>,
    state: Arc<RwLock<PlanStoreState>>,
    epoch: Arc<AtomicU64>,
    events: broadcast::Sender<StoreEvent>,
}

impl PlanStore {
    pub fn new(api: Arc<dyn PlanApi>) -> Self {
        debug!("PlanStore::new: called");
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            state: Arc::new(RwLock::new(PlanStoreState::default())),
            epoch: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> PlanStoreState {
        self.state.read().await.clone()
    }

    /// Cached tasks grouped by AI category
    pub async fn task_groups(&self) -> BTreeMap<String, Vec<Task>> {
        let state = self.state.read().await;
        group_by_category(&state.tasks)
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn begin(&self) -> u64 {
        self.start(Busy::Loading).await
    }

    /// Raise `busy`, clear the last error and return the current epoch
    async fn start(&self, busy: Busy) -> u64 {
        let mut state = self.state.write().await;
        busy.set(&mut state, true);
        state.error = None;
        self.epoch.load(Ordering::SeqCst)
    }

    async fn commit(&self, epoch: u64, event: StoreEvent, merge: impl FnOnce(&mut PlanStoreState)) -> bool {
        self.finish(epoch, Busy::Loading, event, merge).await
    }

    /// Apply `merge` and lower `busy` unless a reset happened since `epoch`
    ///
    /// Only the flag the action raised is touched.
    async fn finish(
        &self,
        epoch: u64,
        busy: Busy,
        event: StoreEvent,
        merge: impl FnOnce(&mut PlanStoreState),
    ) -> bool {
        let mut state = self.state.write().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(epoch, ?event, "finish: store was reset, dropping result");
            return false;
        }
        merge(&mut state);
        busy.set(&mut state, false);
        drop(state);
        self.publish(event);
        true
    }

    async fn record_failure(&self, epoch: u64, err: &ApiError) {
        self.fail(epoch, Some(Busy::Loading), err).await
    }

    async fn fail(&self, epoch: u64, busy: Option<Busy>, err: &ApiError) {
        let message = err.to_string();
        warn!(error = %message, "Store action failed");
        let mut state = self.state.write().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(epoch, "fail: store was reset, dropping error");
            return;
        }
        state.error = Some(message.clone());
        if let Some(busy) = busy {
            busy.set(&mut state, false);
        }
        drop(state);
        self.publish(StoreEvent::Failed { message });
    }

    pub async fn fetch_plans(&self) {
        debug!("fetch_plans: called");
        let epoch = self.begin().await;
        match self.api.list_plans().await {
            Ok(plans) => {
                let count = plans.len();
                self.commit(epoch, StoreEvent::PlansLoaded { count }, |state| state.plans = plans)
                    .await;
            }
            Err(e) => self.record_failure(epoch, &e).await,
        }
    }

    /// Load one plan, make it current and refresh its entry in `plans`
    pub async fn fetch_plan(&self, plan_id: &str) {
        debug!(%plan_id, "fetch_plan: called");
        let epoch = self.begin().await;
        match self.api.get_plan(plan_id).await {
            Ok(plan) => {
                let event = StoreEvent::PlanLoaded {
                    plan_id: plan.id.clone(),
                };
                self.commit(epoch, event, |state| {
                    replace_plan(&mut state.plans, &plan);
                    state.current_plan = Some(plan);
                })
                .await;
            }
            Err(e) => self.record_failure(epoch, &e).await,
        }
    }

    /// Create a plan; on success it heads `plans` and becomes current
    pub async fn create_plan(&self, create: PlanCreate) -> Result<Plan, ApiError> {
        debug!(title = %create.title, "create_plan: called");
        let epoch = self.begin().await;
        match self.api.create_plan(&create).await {
            Ok(plan) => {
                let event = StoreEvent::PlanCreated {
                    plan_id: plan.id.clone(),
                };
                let created = plan.clone();
                self.commit(epoch, event, |state| {
                    state.plans.insert(0, plan.clone());
                    state.current_plan = Some(plan);
                })
                .await;
                info!(plan_id = %created.id, "Plan created");
                Ok(created)
            }
            Err(e) => {
                self.record_failure(epoch, &e).await;
                Err(e)
            }
        }
    }

    pub async fn update_plan(&self, plan_id: &str, update: PlanUpdate) {
        debug!(%plan_id, ?update, "update_plan: called");
        let epoch = self.begin().await;
        match self.api.update_plan(plan_id, &update).await {
            Ok(plan) => {
                let event = StoreEvent::PlanUpdated {
                    plan_id: plan.id.clone(),
                };
                self.commit(epoch, event, |state| {
                    replace_plan(&mut state.plans, &plan);
                    if state.current_plan.as_ref().is_some_and(|p| p.id == plan.id) {
                        state.current_plan = Some(plan);
                    }
                })
                .await;
            }
            Err(e) => self.record_failure(epoch, &e).await,
        }
    }

    /// Delete a plan and drop its tasks from the cache
    pub async fn delete_plan(&self, plan_id: &str) {
        debug!(%plan_id, "delete_plan: called");
        let epoch = self.begin().await;
        match self.api.delete_plan(plan_id).await {
            Ok(()) => {
                let event = StoreEvent::PlanDeleted {
                    plan_id: plan_id.to_string(),
                };
                self.commit(epoch, event, |state| {
                    state.plans.retain(|p| p.id != plan_id);
                    state.tasks.retain(|t| t.plan_id != plan_id);
                    if state.current_plan.as_ref().is_some_and(|p| p.id == plan_id) {
                        state.current_plan = None;
                    }
                })
                .await;
            }
            Err(e) => self.record_failure(epoch, &e).await,
        }
    }

    /// Select the plan views focus on; no network call
    pub async fn set_current_plan(&self, plan: Option<Plan>) {
        debug!(plan_id = ?plan.as_ref().map(|p| &p.id), "set_current_plan: called");
        let plan_id = plan.as_ref().map(|p| p.id.clone());
        self.state.write().await.current_plan = plan;
        self.publish(StoreEvent::CurrentPlanChanged { plan_id });
    }

    /// Replace the task collection, with every plan's tasks or only `plan_id`'s
    pub async fn fetch_tasks(&self, plan_id: Option<&str>) {
        debug!(?plan_id, "fetch_tasks: called");
        let epoch = self.begin().await;
        match self.api.list_tasks(plan_id).await {
            Ok(tasks) => {
                let count = tasks.len();
                self.commit(epoch, StoreEvent::TasksLoaded { count }, |state| state.tasks = tasks)
                    .await;
            }
            Err(e) => self.record_failure(epoch, &e).await,
        }
    }

    pub async fn create_task(&self, create: TaskCreate) -> Result<Task, ApiError> {
        debug!(plan_id = %create.plan_id, title = %create.title, "create_task: called");
        let epoch = self.begin().await;
        match self.api.create_task(&create).await {
            Ok(task) => {
                let event = StoreEvent::TaskCreated {
                    task_id: task.id.clone(),
                };
                let created = task.clone();
                self.commit(epoch, event, |state| state.tasks.push(task)).await;
                Ok(created)
            }
            Err(e) => {
                self.record_failure(epoch, &e).await;
                Err(e)
            }
        }
    }

    pub async fn update_task(&self, task_id: &str, update: TaskUpdate) {
        debug!(%task_id, ?update, "update_task: called");
        let epoch = self.begin().await;
        match self.api.update_task(task_id, &update).await {
            Ok(task) => {
                let event = StoreEvent::TaskUpdated {
                    task_id: task.id.clone(),
                };
                self.commit(epoch, event, |state| {
                    if let Some(slot) = state.tasks.iter_mut().find(|t| t.id == task.id) {
                        *slot = task;
                    }
                })
                .await;
            }
            Err(e) => self.record_failure(epoch, &e).await,
        }
    }

    pub async fn delete_task(&self, task_id: &str) {
        debug!(%task_id, "delete_task: called");
        let epoch = self.begin().await;
        match self.api.delete_task(task_id).await {
            Ok(()) => {
                let event = StoreEvent::TaskDeleted {
                    task_id: task_id.to_string(),
                };
                self.commit(epoch, event, |state| state.tasks.retain(|t| t.id != task_id))
                    .await;
            }
            Err(e) => self.record_failure(epoch, &e).await,
        }
    }

    /// Ask the AI organizer for a dashboard, then re-fetch the plan
    pub async fn generate_ai_dashboard(&self, plan_id: &str) {
        debug!(%plan_id, "generate_ai_dashboard: called");
        let epoch = self.start(Busy::GeneratingAi).await;

        let generation = match self.api.generate_dashboard(plan_id).await {
            Ok(generation) => generation,
            Err(e) => return self.fail(epoch, Some(Busy::GeneratingAi), &e).await,
        };
        info!(%plan_id, interaction_id = ?generation.interaction_id, "Dashboard suggestion received");

        let event = StoreEvent::SuggestionReady {
            plan_id: plan_id.to_string(),
        };
        if !self
            .finish(epoch, Busy::GeneratingAi, event, |state| {
                state.last_suggestion = Some(generation)
            })
            .await
        {
            return;
        }

        self.fetch_plan(plan_id).await;
    }

    /// Approve or reject the stored suggestion, then re-fetch its plan
    pub async fn approve_ai_dashboard(&self, approved: bool, feedback: Option<String>) {
        debug!(approved, "approve_ai_dashboard: called");
        let pending = {
            let state = self.state.read().await;
            state
                .last_suggestion
                .as_ref()
                .and_then(|g| g.interaction_id.clone().map(|id| (id, g.suggestion.plan_id.clone())))
        };
        let Some((interaction_id, plan_id)) = pending else {
            let epoch = self.epoch.load(Ordering::SeqCst);
            let err = ApiError::Validation("No dashboard suggestion to approve".to_string());
            return self.fail(epoch, None, &err).await;
        };
        self.review_interaction(&interaction_id, Some(&plan_id), approved, feedback)
            .await;
    }

    /// Approve or reject a suggestion by interaction id
    ///
    /// Re-fetches `plan_id` (or the plan the backend reports) and its tasks,
    /// since approval writes the dashboard and task scores server-side.
    pub async fn review_interaction(
        &self,
        interaction_id: &str,
        plan_id: Option<&str>,
        approved: bool,
        feedback: Option<String>,
    ) {
        debug!(%interaction_id, ?plan_id, approved, "review_interaction: called");
        let epoch = self.begin().await;
        let request = ApprovalRequest { approved, feedback };
        let outcome = match self.api.approve_dashboard(interaction_id, &request).await {
            Ok(outcome) => outcome,
            Err(e) => return self.record_failure(epoch, &e).await,
        };

        let plan_id = outcome.plan_id.clone().or_else(|| plan_id.map(String::from));
        let event = StoreEvent::SuggestionReviewed {
            plan_id: plan_id.clone(),
            approved: outcome.approved,
        };
        if !self
            .commit(epoch, event, |state| {
                if state
                    .last_suggestion
                    .as_ref()
                    .is_some_and(|g| g.interaction_id.as_deref() == Some(interaction_id))
                {
                    state.last_suggestion = None;
                }
            })
            .await
        {
            return;
        }
        info!(?plan_id, approved = outcome.approved, "Dashboard suggestion reviewed");

        let Some(plan_id) = plan_id else {
            debug!("review_interaction: no plan to refresh");
            return;
        };
        self.fetch_plan(&plan_id).await;
        if approved {
            self.refresh_plan_tasks(&plan_id).await;
        }
    }

    /// Replace the cached tasks of one plan, keeping the rest
    async fn refresh_plan_tasks(&self, plan_id: &str) {
        debug!(%plan_id, "refresh_plan_tasks: called");
        let epoch = self.begin().await;
        match self.api.list_tasks(Some(plan_id)).await {
            Ok(fresh) => {
                let count = fresh.len();
                self.commit(epoch, StoreEvent::TasksLoaded { count }, |state| {
                    state.tasks.retain(|t| t.plan_id != plan_id);
                    state.tasks.extend(fresh);
                })
                .await;
            }
            Err(e) => self.record_failure(epoch, &e).await,
        }
    }

    /// Turn free text into categorized task suggestions
    pub async fn organize_prompt(&self, prompt: &str) -> Result<OrganizedPrompt, ApiError> {
        debug!(prompt_len = prompt.len(), "organize_prompt: called");
        let epoch = self.start(Busy::GeneratingAi).await;
        match self.api.organize_prompt(prompt).await {
            Ok(organized) => {
                let mut state = self.state.write().await;
                if self.epoch.load(Ordering::SeqCst) == epoch {
                    Busy::GeneratingAi.set(&mut state, false);
                }
                Ok(organized)
            }
            Err(e) => {
                self.fail(epoch, Some(Busy::GeneratingAi), &e).await;
                Err(e)
            }
        }
    }

    pub async fn fetch_interaction_history(&self, plan_id: Option<&str>, limit: Option<u32>) {
        debug!(?plan_id, ?limit, "fetch_interaction_history: called");
        let epoch = self.begin().await;
        match self.api.interaction_history(plan_id, limit).await {
            Ok(interactions) => {
                let count = interactions.len();
                self.commit(epoch, StoreEvent::HistoryLoaded { count }, |state| {
                    state.interactions = interactions
                })
                .await;
            }
            Err(e) => self.record_failure(epoch, &e).await,
        }
    }

    pub async fn clear_error(&self) {
        debug!("clear_error: called");
        self.state.write().await.error = None;
        self.publish(StoreEvent::ErrorCleared);
    }

    /// Drop all cached state; in-flight actions will not write back
    pub async fn reset(&self) {
        debug!("reset: called");
        let mut state = self.state.write().await;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *state = PlanStoreState::default();
        drop(state);
        info!(epoch, "PlanStore reset");
        self.publish(StoreEvent::Reset);
    }
}

fn replace_plan(plans: &mut [Plan], plan: &Plan) {
    if let Some(slot) = plans.iter_mut().find(|p| p.id == plan.id) {
        *slot = plan.clone();
    }
}
