//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod info;
mod orchestrator;
mod train;
mod trainer;
mod workers;

pub use info::InfoCommands;
pub use orchestrator::OrchestratorCommands;
pub use train::TrainCommands;
pub use trainer::TrainerCommands;
pub use workers::WorkerCommands;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chiron_session::{AlwaysConfirm, Confirm, DestructiveAction, Session, SessionConfig};
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Worker management
    Workers {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Orchestrator deployment
    Orchestrator {
        #[command(subcommand)]
        command: OrchestratorCommands,
    },
    /// Trainer deployment
    Trainer {
        #[command(subcommand)]
        command: TrainerCommands,
    },
    /// Federated training runs
    Train {
        #[command(subcommand)]
        command: TrainCommands,
    },
    /// Detailed information about a worker or application
    Info {
        #[command(subcommand)]
        command: InfoCommands,
    },
}

/// Handle a CLI command
///
/// Opens a session on the configured workspace and routes the command to
/// the appropriate handler module. The session is shut down afterwards
/// whatever the outcome.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let session = open_session(config).await?;

    let result = match command {
        Commands::Workers { command } => workers::handle_worker_command(command, &session, config).await,
        Commands::Orchestrator { command } => {
            orchestrator::handle_orchestrator_command(command, &session, config).await
        }
        Commands::Trainer { command } => trainer::handle_trainer_command(command, &session).await,
        Commands::Train { command } => train::handle_train_command(command, &session, config).await,
        Commands::Info { command } => info::handle_info_command(command, &session).await,
    };

    session.shutdown();
    result
}

/// Build a session and connect every worker of the configured workspace
async fn open_session(config: &Config) -> Result<Session> {
    let client = config.client();
    let session_config = SessionConfig::from_env()?;
    let session = Session::new(Arc::new(client.clone()), Arc::new(client), session_config);

    let connected = session
        .connect(&config.workspace)
        .await
        .with_context(|| format!("Failed to connect workspace '{}'", config.workspace))?;
    tracing::debug!(workspace = %config.workspace, workers = connected.len(), "Workspace connected");

    Ok(session)
}

/// Confirmation source for destructive actions
///
/// `--yes` accepts everything; otherwise the user is asked on stdin.
pub(crate) fn confirmer(config: &Config) -> Box<dyn Confirm> {
    if config.assume_yes {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(prompt)
    }
}

fn prompt(action: &DestructiveAction) -> bool {
    print!("{} {} ", action.to_string().yellow(), "[y/N]".dimmed());
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Colorize an application status for display
pub(crate) fn colorize_status(
    status: chiron_core::domain::application::ApplicationStatus,
) -> ColoredString {
    use chiron_core::domain::application::ApplicationStatus;

    let status_str = status.as_str();
    match status {
        ApplicationStatus::Running => status_str.green(),
        ApplicationStatus::DeployFailed | ApplicationStatus::Unhealthy => status_str.red(),
        ApplicationStatus::Deploying | ApplicationStatus::Deleting => status_str.yellow(),
        ApplicationStatus::NotStarted => status_str.dimmed(),
    }
}
