mod approve_cmd;
mod config;
mod decide_cmd;
mod dispatch;
mod run_cmd;
mod status_cmd;

use clap::{Parser, Subcommand};
use gator_db::models::GroupDecision;

use config::GatorConfig;

#[derive(Parser)]
#[command(name = "gator", about = "Parallel AI coding agent execution engine")]
struct Cli {
    /// Session root directory (overrides GATOR_SESSION_ROOT env var and the config file)
    #[arg(long, global = true)]
    session_root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session from a plan file and drive it to completion
    Run {
        /// Path to a `PlanSpec` JSON file
        plan_file: String,
    },
    /// Resume a paused or interrupted session
    Resume {
        /// Session ID to resume
        session_id: String,
    },
    /// Show session status (omit session_id to list all sessions)
    Status {
        /// Session ID to show status for (omit to list all sessions)
        session_id: Option<String>,
    },
    /// Approve a task awaiting human review
    Approve {
        /// Session ID the task belongs to
        session_id: String,
        /// Task ID to approve
        task_id: String,
    },
    /// Reject a task awaiting human review
    Reject {
        /// Session ID the task belongs to
        session_id: String,
        /// Task ID to reject
        task_id: String,
        /// Reason for rejection
        reason: String,
    },
    /// Resolve a paused group's outcome: continue, abort, or retry-failed
    Decide {
        /// Session ID with a group awaiting a decision
        session_id: String,
        /// One of: continue, abort, retry-failed
        decision: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let exit_code = run(cli).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let config = match GatorConfig::resolve(cli.session_root.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return run_cmd::EXIT_INVALID_INPUT;
        }
    };

    let result = match cli.command {
        Commands::Run { plan_file } => run_cmd::run_plan(&plan_file, &config).await,
        Commands::Resume { session_id } => run_cmd::resume_session(&session_id, &config).await,
        Commands::Status { session_id } => {
            status_cmd::run_status(session_id.as_deref(), &config).map(|()| run_cmd::EXIT_SUCCESS)
        }
        Commands::Approve { session_id, task_id } => {
            approve_cmd::run_approve(&session_id, &task_id, &config).map(|()| run_cmd::EXIT_SUCCESS)
        }
        Commands::Reject {
            session_id,
            task_id,
            reason,
        } => approve_cmd::run_reject(&session_id, &task_id, &reason, &config)
            .map(|()| run_cmd::EXIT_SUCCESS),
        Commands::Decide { session_id, decision } => match decision.parse::<GroupDecision>() {
            Ok(decision) => {
                decide_cmd::run_decide(&session_id, decision, &config).map(|()| run_cmd::EXIT_SUCCESS)
            }
            Err(e) => {
                eprintln!("{e}");
                return run_cmd::EXIT_INVALID_INPUT;
            }
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            run_cmd::EXIT_SESSION_FAILED
        }
    }
}
