//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::OAuthProvider;
use crate::domain::{PlanStatus, TaskStatus};

/// Mindmesh - organize scattered thoughts into plans
#[derive(Parser)]
#[command(
    name = "mm",
    about = "Mindmesh client: sign in, manage plans and tasks, run the AI organizer",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/mindmesh/logs/mindmesh.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Sign in with email and password
    Login {
        email: String,

        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create an account
    Signup {
        email: String,

        #[arg(short, long)]
        password: String,

        /// Must match --password
        #[arg(long)]
        confirm: String,

        /// Stored as `full_name` in the user metadata
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the signed-in user and a dashboard summary
    Whoami,

    /// Email a password reset link
    ResetPassword { email: String },

    /// Set a new password for the signed-in user
    UpdatePassword {
        #[arg(short, long)]
        password: String,

        #[arg(long)]
        confirm: String,
    },

    /// Send the confirmation email again
    ResendVerification { email: String },

    /// Print the URL that starts an OAuth sign-in (google, github)
    OauthUrl { provider: OAuthProvider },

    /// Finish sign-in from the URL the browser was redirected to
    Callback { url: String },

    /// Check that the backend is reachable
    Health,

    /// Manage plans
    Plans {
        #[command(subcommand)]
        command: PlanCommand,
    },

    /// Manage tasks
    Tasks {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// AI organizer
    Ai {
        #[command(subcommand)]
        command: AiCommand,
    },
}

/// Plan subcommands
#[derive(Subcommand)]
pub enum PlanCommand {
    /// List plans, newest first
    List {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one plan with its tasks
    Show {
        id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    Create {
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        /// The free-text thought the plan came from
        #[arg(short, long)]
        thought: Option<String>,
    },

    Update {
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        status: Option<PlanStatus>,
    },

    /// Delete a plan and its tasks
    Delete { id: String },
}

/// Task subcommands
#[derive(Subcommand)]
pub enum TaskCommand {
    List {
        /// Only tasks of this plan
        #[arg(short, long)]
        plan: Option<String>,

        /// Group by AI category
        #[arg(short, long)]
        grouped: bool,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    Create {
        plan_id: String,

        title: String,

        #[arg(short, long)]
        description: Option<String>,

        /// 1 (lowest) to 5 (highest)
        #[arg(long)]
        priority: Option<u8>,
    },

    Update {
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        /// pending, in_progress or completed
        #[arg(short, long)]
        status: Option<TaskStatus>,

        #[arg(long)]
        priority: Option<u8>,
    },

    Delete { id: String },
}

/// AI subcommands
#[derive(Subcommand)]
pub enum AiCommand {
    /// Generate a dashboard suggestion for a plan
    Generate { plan_id: String },

    /// Approve or reject a suggestion
    Approve {
        interaction_id: String,

        /// Reject instead of approve
        #[arg(long)]
        reject: bool,

        #[arg(short, long)]
        feedback: Option<String>,
    },

    /// List past AI interactions
    History {
        #[arg(short, long)]
        plan: Option<String>,

        /// 1 to 100
        #[arg(short = 'n', long)]
        limit: Option<u32>,
    },

    /// Turn free text into categorized tasks
    Organize { prompt: String },
}

/// Output format for listings
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
