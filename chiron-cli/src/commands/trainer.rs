//! Trainer command handlers

use anyhow::Result;
use chiron_session::Session;
use clap::Subcommand;
use colored::*;

use super::colorize_status;
use crate::id_resolver::{resolve_trainer, resolve_worker};

/// Trainer subcommands
#[derive(Subcommand)]
pub enum TrainerCommands {
    /// List trainers across all workers
    List,
    /// Deploy a trainer on a worker and wait for it to settle
    Create {
        /// Worker service id (or an unambiguous fragment)
        worker: String,
        /// Trainer artifact to deploy
        #[arg(short, long)]
        artifact: String,
        /// Dataset ids the trainer trains on (repeatable)
        #[arg(short, long = "dataset", required = true)]
        datasets: Vec<String>,
        /// Initial weights to load
        #[arg(long)]
        initial_weights: Option<String>,
    },
    /// Remove a trainer
    Remove {
        /// `<worker>#<app-id>` or a bare app id
        trainer: String,
    },
}

/// Handle trainer commands
pub async fn handle_trainer_command(command: TrainerCommands, session: &Session) -> Result<()> {
    match command {
        TrainerCommands::List => {
            let trainers = session.trainers();
            if trainers.is_empty() {
                println!("{}", "No trainers found.".yellow());
                return Ok(());
            }
            for trainer in trainers {
                println!(
                    "  {} {} {}",
                    "▸".cyan(),
                    trainer.key().to_string().bold(),
                    colorize_status(trainer.status)
                );
                let mut datasets: Vec<_> = trainer.datasets.keys().cloned().collect();
                datasets.sort();
                if !datasets.is_empty() {
                    println!("    Datasets:     {}", datasets.join(", "));
                }
            }
            Ok(())
        }
        TrainerCommands::Create {
            worker,
            artifact,
            datasets,
            initial_weights,
        } => {
            let worker_id = resolve_worker(session, &worker)?;
            println!("Deploying trainer on {}...", worker_id.bold());
            let record = session
                .create_trainer(&worker_id, &datasets, &artifact, initial_weights.as_deref())
                .await?;
            println!(
                "{} Trainer {} is {}",
                "✓".green(),
                record.key().to_string().bold(),
                colorize_status(record.status)
            );
            Ok(())
        }
        TrainerCommands::Remove { trainer } => {
            let key = resolve_trainer(session, &trainer)?;
            session.remove_trainer(&key).await?;
            println!("{} Removed trainer {}", "✓".green(), key.to_string().bold());
            Ok(())
        }
    }
}
