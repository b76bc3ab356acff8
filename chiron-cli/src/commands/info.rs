//! Info command handlers
//!
//! Prints the detailed description of a worker or application as JSON.

use anyhow::Result;
use chiron_core::domain::application::AppKey;
use chiron_session::{InfoTarget, Session};
use clap::Subcommand;

use crate::id_resolver::{resolve_trainer, resolve_worker};

/// Info subcommands
#[derive(Subcommand)]
pub enum InfoCommands {
    /// Describe a worker's manager
    Worker { worker: String },
    /// Describe the orchestrator of a worker
    Orchestrator { worker: String },
    /// Describe a trainer
    Trainer { trainer: String },
}

/// Handle info commands
pub async fn handle_info_command(command: InfoCommands, session: &Session) -> Result<()> {
    let target = match command {
        InfoCommands::Worker { worker } => InfoTarget::Manager(resolve_worker(session, &worker)?),
        InfoCommands::Orchestrator { worker } => {
            InfoTarget::Application(AppKey::orchestrator(resolve_worker(session, &worker)?))
        }
        InfoCommands::Trainer { trainer } => {
            InfoTarget::Application(resolve_trainer(session, &trainer)?)
        }
    };

    let info = session.app_info(&target).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
