//! Training command handlers
//!
//! Selects an orchestrator and its trainers, runs a training to completion
//! and prints the resulting loss curves.

use std::time::Duration;

use anyhow::Result;
use chiron_core::domain::application::AppKey;
use chiron_core::domain::training::{TrainingHistory, TrainingRunStatus};
use chiron_session::{Session, TrainingParams, TrainingPhase};
use clap::Subcommand;
use colored::*;

use super::confirmer;
use crate::config::Config;
use crate::id_resolver::{resolve_trainer, resolve_worker};

/// Training subcommands
#[derive(Subcommand)]
pub enum TrainCommands {
    /// Run a training and follow it until it finishes (Ctrl-C stops it)
    Run {
        /// Worker hosting the orchestrator
        #[arg(short, long)]
        orchestrator: String,
        /// Trainers taking part (`<worker>#<app-id>` or bare app id, repeatable)
        #[arg(short, long = "trainer", required = true)]
        trainers: Vec<String>,
        /// Number of federated rounds
        #[arg(short, long, default_value_t = 5)]
        rounds: u32,
        /// Fraction of training batches per round
        #[arg(long)]
        limit_train_batches: Option<f64>,
        /// Fraction of evaluation batches per round
        #[arg(long)]
        limit_eval_batches: Option<f64>,
    },
    /// Show the loss history of an orchestrator
    History {
        /// Worker hosting the orchestrator
        orchestrator: String,
    },
    /// Reset an orchestrator's round counter and history
    Reset {
        /// Worker hosting the orchestrator
        orchestrator: String,
    },
}

/// Handle training commands
pub async fn handle_train_command(
    command: TrainCommands,
    session: &Session,
    config: &Config,
) -> Result<()> {
    match command {
        TrainCommands::Run {
            orchestrator,
            trainers,
            rounds,
            limit_train_batches,
            limit_eval_batches,
        } => {
            select_orchestrator(session, config, &orchestrator).await?;

            let keys = trainers
                .iter()
                .map(|t| resolve_trainer(session, t))
                .collect::<Result<Vec<AppKey>>>()?;
            session.set_trainers(keys).await?;

            let params =
                TrainingParams::new(rounds).with_limits(limit_train_batches, limit_eval_batches);
            session.start_training(params).await?;
            println!("{} Training started ({} rounds)", "▸".cyan(), rounds);

            follow_run(session).await?;
            Ok(())
        }
        TrainCommands::History { orchestrator } => {
            select_orchestrator(session, config, &orchestrator).await?;
            print_history(&session.training_history());
            Ok(())
        }
        TrainCommands::Reset { orchestrator } => {
            select_orchestrator(session, config, &orchestrator).await?;
            session.reset_training_state().await?;
            println!("{} Training state reset", "✓".green());
            Ok(())
        }
    }
}

async fn select_orchestrator(session: &Session, config: &Config, reference: &str) -> Result<()> {
    let worker_id = resolve_worker(session, reference)?;
    let confirm = confirmer(config);
    session
        .select_orchestrator(Some(AppKey::orchestrator(worker_id)), confirm.as_ref())
        .await?;
    Ok(())
}

/// Print progress until the run goes back to idle
async fn follow_run(session: &Session) -> Result<()> {
    let mut phase = session.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    let mut last_line = String::new();

    loop {
        if *phase.borrow_and_update() == TrainingPhase::Idle {
            break;
        }

        tokio::select! {
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Some(status) = session.training_status() {
                    let line = progress_line(&status);
                    if line != last_line {
                        println!("{}", line);
                        last_line = line;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Stopping training...".yellow());
                session.stop_training().await?;
            }
        }
    }

    match session.last_error() {
        Some(error) => println!("{} {}", "✗ Training failed:".red(), error),
        None => {
            if let Some(status) = session.training_status() {
                println!("{}", progress_line(&status));
            }
            print_history(&session.training_history());
        }
    }
    Ok(())
}

fn progress_line(status: &TrainingRunStatus) -> String {
    let stage = status
        .stage
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "  Round {}/{} [{}]",
        status.current_round, status.target_round, stage
    );

    let mut trainers: Vec<_> = status.per_trainer_progress.iter().collect();
    trainers.sort_by(|a, b| a.0.cmp(b.0));
    for (service_id, progress) in trainers {
        match &progress.error {
            Some(error) => line.push_str(&format!("  {}: error {}", service_id, error)),
            None => line.push_str(&format!(
                "  {}: {:.0}%",
                service_id,
                progress.progress_fraction * 100.0
            )),
        }
    }
    line
}

/// Print the loss table
fn print_history(history: &TrainingHistory) {
    if history.is_empty() {
        println!("{}", "No training history found.".yellow());
        return;
    }

    println!("{}", format!("{:>6}  {:>12}  {:>12}", "Round", "Train loss", "Val loss").bold());
    let last = history.last_round().unwrap_or(0);
    for round in 1..=last {
        let train = lookup(&history.training_losses, round);
        let val = lookup(&history.validation_losses, round);
        if train.is_none() && val.is_none() {
            continue;
        }
        println!("{:>6}  {:>12}  {:>12}", round, fmt_loss(train), fmt_loss(val));
    }
}

fn lookup(points: &[(u32, f64)], round: u32) -> Option<f64> {
    points.iter().find(|(r, _)| *r == round).map(|(_, loss)| *loss)
}

fn fmt_loss(loss: Option<f64>) -> String {
    loss.map(|l| format!("{:.4}", l))
        .unwrap_or_else(|| "-".to_string())
}
