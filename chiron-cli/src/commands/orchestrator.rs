//! Orchestrator command handlers

use anyhow::Result;
use chiron_session::Session;
use clap::Subcommand;
use colored::*;

use super::{colorize_status, confirmer};
use crate::config::Config;
use crate::id_resolver::resolve_worker;

/// Orchestrator subcommands
#[derive(Subcommand)]
pub enum OrchestratorCommands {
    /// List orchestrators across all workers
    List,
    /// Deploy an orchestrator on a worker and wait for it to settle
    Create {
        /// Worker service id (or an unambiguous fragment)
        worker: String,
        /// Trainer artifact the orchestrator aggregates
        #[arg(short, long)]
        artifact: String,
    },
    /// Remove the orchestrator of a worker
    Remove {
        /// Worker service id (or an unambiguous fragment)
        worker: String,
    },
}

/// Handle orchestrator commands
pub async fn handle_orchestrator_command(
    command: OrchestratorCommands,
    session: &Session,
    config: &Config,
) -> Result<()> {
    match command {
        OrchestratorCommands::List => {
            let orchestrators = session.orchestrators();
            if orchestrators.is_empty() {
                println!("{}", "No orchestrators found.".yellow());
                return Ok(());
            }
            for orchestrator in orchestrators {
                println!(
                    "  {} {} {}",
                    "▸".cyan(),
                    orchestrator.owner_worker_id.bold(),
                    colorize_status(orchestrator.status)
                );
                if let Some(artifact) = &orchestrator.artifact_id {
                    println!("    Artifact:     {}", artifact);
                }
            }
            Ok(())
        }
        OrchestratorCommands::Create { worker, artifact } => {
            let worker_id = resolve_worker(session, &worker)?;
            println!("Deploying orchestrator on {}...", worker_id.bold());
            let record = session.create_orchestrator(&worker_id, &artifact).await?;
            println!(
                "{} Orchestrator {} is {}",
                "✓".green(),
                record.key().to_string().bold(),
                colorize_status(record.status)
            );
            Ok(())
        }
        OrchestratorCommands::Remove { worker } => {
            let worker_id = resolve_worker(session, &worker)?;
            let confirm = confirmer(config);
            session
                .remove_orchestrator(&worker_id, confirm.as_ref())
                .await?;
            println!("{} Removed orchestrator of {}", "✓".green(), worker_id.bold());
            Ok(())
        }
    }
}
