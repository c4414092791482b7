//! Mindmesh - command-line client
//!
//! Signs in against the identity provider and drives the plan/task store.

use std::fs;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use serde_json::{Map, Value};
use tracing::info;

use mindmesh::api::{ApiClient, PlanApi};
use mindmesh::auth::{GoTrueClient, SignUpOutcome};
use mindmesh::cli::{AiCommand, Cli, Command, OutputFormat, PlanCommand, TaskCommand};
use mindmesh::config::Config;
use mindmesh::domain::{Plan, PlanCreate, PlanUpdate, Task, TaskCreate, TaskStatus, TaskUpdate};
use mindmesh::session::{CallbackParams, FileSessionStorage, RefreshPolicy, SessionStore};
use mindmesh::store::{PlanStore, PlanStoreState};

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mindmesh")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to log file, not stdout/stderr
    let level = match level {
        Some(l) => l.parse::<tracing::Level>().map_err(|_| eyre!("Invalid log level '{}'", l))?,
        None => tracing::Level::INFO,
    };
    let log_file = fs::File::create(log_dir.join("mindmesh.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

/// Session and plan store wired to the configured backends
struct App {
    session: SessionStore,
    store: PlanStore,
    api: Arc<ApiClient>,
}

impl App {
    async fn start(config: &Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let provider = GoTrueClient::from_config(&config.auth).context("Failed to create identity provider client")?;
        let storage = FileSessionStorage::new(&config.session.storage_path);
        let session = SessionStore::spawn(
            Arc::new(provider),
            Arc::new(storage),
            RefreshPolicy::from(&config.session),
        );
        session.initialize_auth().await;

        let api = Arc::new(
            ApiClient::from_config(&config.api, Arc::new(session.clone())).context("Failed to create API client")?,
        );
        let store = PlanStore::new(api.clone());
        Ok(Self { session, store, api })
    }

    async fn require_signed_in(&self) -> Result<()> {
        match self.session.current().await {
            Some(_) => Ok(()),
            None => Err(eyre!("Not signed in. Run `mm login <email>` first.")),
        }
    }
}

/// Fail with the store's error message if the last action recorded one
async fn settled(store: &PlanStore) -> Result<PlanStoreState> {
    let state = store.state().await;
    match &state.error {
        Some(message) => Err(eyre!("{}", message)),
        None => Ok(state),
    }
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| Config::load_log_level(cli.config.as_ref()));
    setup_logging(level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(auth_url = %config.auth.url, api_url = %config.api.base_url, "Mindmesh loaded config");

    let app = App::start(&config).await?;

    let result = match cli.command {
        Command::Login { email, password } => cmd_login(&app, &email, password).await,
        Command::Signup {
            email,
            password,
            confirm,
            name,
        } => cmd_signup(&app, &email, &password, &confirm, name).await,
        Command::Logout => cmd_logout(&app).await,
        Command::Whoami => cmd_whoami(&app).await,
        Command::ResetPassword { email } => {
            app.session.reset_password_for_email(&email).await?;
            println!("{} Password reset email sent to {}", "✓".green(), email.cyan());
            Ok(())
        }
        Command::UpdatePassword { password, confirm } => {
            app.session.update_password(&password, &confirm).await?;
            println!("{} Password updated", "✓".green());
            Ok(())
        }
        Command::ResendVerification { email } => {
            app.session.resend_verification(&email).await?;
            println!("{} Verification email sent to {}", "✓".green(), email.cyan());
            Ok(())
        }
        Command::OauthUrl { provider } => {
            let url = app.session.oauth_sign_in_url(provider).await?;
            println!("Open this URL to continue with {}:", provider.to_string().cyan());
            println!("{}", url);
            Ok(())
        }
        Command::Callback { url } => cmd_callback(&app, &url).await,
        Command::Health => {
            let health = app.api.health().await.context("Health check failed")?;
            println!(
                "Backend {} (version {})",
                health.status.green(),
                health.version.as_deref().unwrap_or("unknown")
            );
            Ok(())
        }
        Command::Plans { command } => cmd_plans(&app, command).await,
        Command::Tasks { command } => cmd_tasks(&app, command).await,
        Command::Ai { command } => cmd_ai(&app, command).await,
    };

    app.session.shutdown().await.ok();
    result
}

async fn cmd_login(app: &App, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => read_password()?,
    };
    let session = app.session.sign_in(email, &password).await?;
    println!("{} Signed in as {}", "✓".green(), session.email.cyan());
    if !session.is_verified() {
        println!("{}", "Email address not yet verified".yellow());
    }
    Ok(())
}

async fn cmd_signup(app: &App, email: &str, password: &str, confirm: &str, name: Option<String>) -> Result<()> {
    mindmesh::auth::validate_new_password(password, confirm)?;
    let mut metadata = Map::new();
    if let Some(name) = name {
        metadata.insert("full_name".to_string(), Value::String(name));
    }
    match app.session.sign_up(email, password, metadata).await? {
        SignUpOutcome::SignedIn(session) => {
            println!("{} Account created, signed in as {}", "✓".green(), session.email.cyan());
        }
        SignUpOutcome::ConfirmationRequired { email } => {
            println!(
                "{} Check {} for a confirmation link, then run `mm callback <url>`",
                "✓".green(),
                email.cyan()
            );
        }
    }
    Ok(())
}

async fn cmd_logout(app: &App) -> Result<()> {
    app.session.sign_out().await?;
    app.store.reset().await;
    println!("{} Signed out", "✓".green());
    Ok(())
}

async fn cmd_whoami(app: &App) -> Result<()> {
    let Some(session) = app.session.current().await else {
        println!("Not signed in");
        return Ok(());
    };

    println!("User: {}", session.email.cyan());
    if let Some(name) = session.full_name() {
        println!("  Name: {}", name);
    }
    println!("  Id: {}", session.user_id.dimmed());
    let verified = if session.is_verified() { "yes".green() } else { "no".yellow() };
    println!("  Verified: {}", verified);
    println!("  Token expires: {}", session.expires_at.to_rfc3339().dimmed());

    futures::join!(app.store.fetch_plans(), app.store.fetch_tasks(None));
    let state = settled(&app.store).await?;
    let completed = state.tasks.iter().filter(|t| t.is_completed()).count();
    println!(
        "  Plans: {}  Tasks: {} ({} completed)",
        state.plans.len(),
        state.tasks.len(),
        completed
    );
    Ok(())
}

async fn cmd_callback(app: &App, url: &str) -> Result<()> {
    let params = CallbackParams::parse(url)?;
    match app.session.handle_callback(&params).await? {
        Some(session) => println!("{} Signed in as {}", "✓".green(), session.email.cyan()),
        None => println!("Could not complete sign-in from that link. Run `mm login <email>`."),
    }
    Ok(())
}

fn print_plan(plan: &Plan) {
    println!(
        "{} {} [{}]{}",
        plan.id.yellow(),
        plan.title.bold(),
        plan.status,
        if plan.has_ai_data() { " (AI)".cyan().to_string() } else { String::new() }
    );
    if let Some(description) = plan.description.as_deref().filter(|d| !d.is_empty()) {
        println!("    {}", description.dimmed());
    }
}

fn print_task(task: &Task) {
    let mark = match task.status {
        TaskStatus::Completed => "✓".green(),
        TaskStatus::InProgress => "»".yellow(),
        TaskStatus::Pending => "·".normal(),
    };
    let score = task
        .ai_priority_score
        .map(|s| format!(" score {}", s))
        .unwrap_or_default();
    println!(
        "  {} {} {} (p{}{})",
        mark,
        task.id.yellow(),
        task.title,
        task.priority,
        score.dimmed()
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_plans(app: &App, command: PlanCommand) -> Result<()> {
    app.require_signed_in().await?;
    let store = &app.store;
    match command {
        PlanCommand::List { format } => {
            store.fetch_plans().await;
            let state = settled(store).await?;
            match format {
                OutputFormat::Json => print_json(&state.plans)?,
                OutputFormat::Text if state.plans.is_empty() => println!("No plans found"),
                OutputFormat::Text => state.plans.iter().for_each(print_plan),
            }
        }
        PlanCommand::Show { id, format } => {
            futures::join!(store.fetch_plan(&id), store.fetch_tasks(Some(&id)));
            let state = settled(store).await?;
            let plan = state.current_plan.ok_or_else(|| eyre!("Plan {} not found", id))?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({"plan": plan, "tasks": state.tasks}))?,
                OutputFormat::Text => {
                    print_plan(&plan);
                    if let Some(dashboard) = plan.ai_dashboard().context("Stored AI dashboard is unreadable")? {
                        println!("  {}: {}", dashboard.dashboard_title.cyan(), dashboard.summary);
                        for step in &dashboard.next_steps {
                            println!("    - {}", step);
                        }
                    }
                    state.tasks.iter().for_each(print_task);
                }
            }
        }
        PlanCommand::Create {
            title,
            description,
            thought,
        } => {
            let mut create = PlanCreate::new(title, description.unwrap_or_default());
            if let Some(thought) = thought {
                create = create.with_original_thought(thought);
            }
            let plan = store.create_plan(create).await?;
            println!("{} Created plan: {}", "✓".green(), plan.id.cyan());
        }
        PlanCommand::Update {
            id,
            title,
            description,
            status,
        } => {
            let update = PlanUpdate {
                title,
                description,
                status,
                ..Default::default()
            };
            if update.is_empty() {
                return Err(eyre!("Nothing to update"));
            }
            store.update_plan(&id, update).await;
            settled(store).await?;
            println!("{} Updated plan: {}", "✓".green(), id);
        }
        PlanCommand::Delete { id } => {
            store.delete_plan(&id).await;
            settled(store).await?;
            println!("{} Deleted plan: {}", "✓".green(), id);
        }
    }
    Ok(())
}

async fn cmd_tasks(app: &App, command: TaskCommand) -> Result<()> {
    app.require_signed_in().await?;
    let store = &app.store;
    match command {
        TaskCommand::List { plan, grouped, format } => {
            store.fetch_tasks(plan.as_deref()).await;
            let state = settled(store).await?;
            match format {
                OutputFormat::Json if grouped => print_json(&store.task_groups().await)?,
                OutputFormat::Json => print_json(&state.tasks)?,
                OutputFormat::Text if state.tasks.is_empty() => println!("No tasks found"),
                OutputFormat::Text if grouped => {
                    for (category, tasks) in store.task_groups().await {
                        println!("{} ({})", category.bold(), tasks.len());
                        tasks.iter().for_each(print_task);
                    }
                }
                OutputFormat::Text => state.tasks.iter().for_each(print_task),
            }
        }
        TaskCommand::Create {
            plan_id,
            title,
            description,
            priority,
        } => {
            let mut create = TaskCreate::new(plan_id, title);
            if let Some(description) = description {
                create = create.with_description(description);
            }
            if let Some(priority) = priority {
                create = create.with_priority(priority);
            }
            let task = store.create_task(create).await?;
            println!("{} Created task: {}", "✓".green(), task.id.cyan());
        }
        TaskCommand::Update {
            id,
            title,
            status,
            priority,
        } => {
            let update = TaskUpdate {
                title,
                status,
                priority,
                ..Default::default()
            };
            if update.is_empty() {
                return Err(eyre!("Nothing to update"));
            }
            update.validate().map_err(|e| eyre!(e))?;
            store.update_task(&id, update).await;
            settled(store).await?;
            println!("{} Updated task: {}", "✓".green(), id);
        }
        TaskCommand::Delete { id } => {
            store.delete_task(&id).await;
            settled(store).await?;
            println!("{} Deleted task: {}", "✓".green(), id);
        }
    }
    Ok(())
}

async fn cmd_ai(app: &App, command: AiCommand) -> Result<()> {
    app.require_signed_in().await?;
    let store = &app.store;
    match command {
        AiCommand::Generate { plan_id } => {
            println!("Organizing plan {}...", plan_id.cyan());
            store.generate_ai_dashboard(&plan_id).await;
            let state = settled(store).await?;
            let generation = state
                .last_suggestion
                .ok_or_else(|| eyre!("No suggestion was returned"))?;
            let data = &generation.suggestion.dashboard_data;
            println!("{} {}", "✓".green(), data.dashboard_title.bold());
            println!("  {}", data.summary);
            for category in &data.categories {
                println!("  {} ({} tasks)", category.name.cyan(), category.tasks.len());
            }
            let histogram: Vec<String> = mindmesh::domain::priority_histogram(&data.priority_groups)
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(bucket, count)| format!("{} {}", bucket, count))
                .collect();
            if !histogram.is_empty() {
                println!("  Priorities: {}", histogram.join(", "));
            }
            if let Some(id) = generation.interaction_id {
                println!("Approve with: mm ai approve {}", id.yellow());
            }
        }
        AiCommand::Approve {
            interaction_id,
            reject,
            feedback,
        } => {
            store.review_interaction(&interaction_id, None, !reject, feedback).await;
            settled(store).await?;
            let verb = if reject { "Rejected" } else { "Approved" };
            println!("{} {} suggestion {}", "✓".green(), verb, interaction_id);
        }
        AiCommand::History { plan, limit } => {
            store.fetch_interaction_history(plan.as_deref(), limit).await;
            let state = settled(store).await?;
            if state.interactions.is_empty() {
                println!("No AI interactions found");
            }
            for interaction in &state.interactions {
                println!(
                    "{} {} plan {} {}",
                    interaction.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                    interaction.interaction_type.cyan(),
                    interaction.plan_id,
                    interaction
                        .response_time_ms
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_default()
                        .dimmed()
                );
            }
        }
        AiCommand::Organize { prompt } => {
            let organized = store.organize_prompt(&prompt).await?;
            println!("{} {}", "✓".green(), organized.summary);
            for category in &organized.categories {
                println!("{} ({})", category.name.bold(), category.tasks.len());
                for task in category.tasks.iter() {
                    println!("  - {} (p{})", task.title, task.priority);
                }
            }
        }
    }
    Ok(())
}
