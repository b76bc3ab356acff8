//! Worker command handlers
//!
//! Handles listing, refreshing and disconnecting connected workers.

use anyhow::Result;
use chiron_session::{Session, WorkerConnection};
use clap::Subcommand;
use colored::*;

use super::{colorize_status, confirmer};
use crate::config::Config;
use crate::id_resolver::resolve_worker;

/// Worker subcommands
#[derive(Subcommand)]
pub enum WorkerCommands {
    /// List the workers of the workspace
    List,
    /// Refresh a worker's snapshot
    Refresh {
        /// Worker service id (or an unambiguous fragment)
        worker: String,
    },
    /// Disconnect a worker
    Disconnect {
        /// Worker service id (or an unambiguous fragment)
        worker: String,
    },
}

/// Handle worker commands
pub async fn handle_worker_command(
    command: WorkerCommands,
    session: &Session,
    config: &Config,
) -> Result<()> {
    match command {
        WorkerCommands::List => list_workers(session),
        WorkerCommands::Refresh { worker } => {
            let worker_id = resolve_worker(session, &worker)?;
            session.refresh(&worker_id).await?;
            if let Some(connection) = session.workers().into_iter().find(|w| w.service_id == worker_id) {
                print_worker_summary(&connection);
            }
            Ok(())
        }
        WorkerCommands::Disconnect { worker } => {
            let worker_id = resolve_worker(session, &worker)?;
            let confirm = confirmer(config);
            session.disconnect(&worker_id, confirm.as_ref()).await?;
            println!("{} Disconnected {}", "✓".green(), worker_id.bold());
            Ok(())
        }
    }
}

fn list_workers(session: &Session) -> Result<()> {
    let workers = session.workers();

    if workers.is_empty() {
        println!("{}", "No workers found.".yellow());
    } else {
        println!("{}", format!("Found {} worker(s):", workers.len()).bold());
        println!();
        for worker in &workers {
            print_worker_summary(worker);
        }
    }

    Ok(())
}

/// Print a worker summary
fn print_worker_summary(worker: &WorkerConnection) {
    let state = if worker.connected {
        "connected".green()
    } else {
        "disconnected".red()
    };

    println!("  {} Worker {}", "▸".cyan(), worker.service_id.bold());
    println!("    State:        {}", state);

    if let Some(info) = &worker.last_snapshot {
        let cluster = &info.cluster;
        println!(
            "    CPU:          {:.0}% used of {}",
            cluster.cpu_used_fraction() * 100.0,
            cluster.total_cpu
        );
        if cluster.total_gpu > 0.0 {
            println!(
                "    GPU:          {:.0}% used of {}",
                cluster.gpu_used_fraction() * 100.0,
                cluster.total_gpu
            );
        }

        let mut datasets: Vec<_> = info.datasets.iter().collect();
        datasets.sort_by(|a, b| a.0.cmp(b.0));
        for (id, manifest) in datasets {
            println!("    Dataset:      {} ({})", manifest.label(), id.dimmed());
        }
    }

    if let Some(orchestrator) = &worker.applications.orchestrator {
        println!("    Orchestrator: {}", colorize_status(orchestrator.status));
    }
    for trainer in worker.applications.trainers.values() {
        println!(
            "    Trainer:      {} {}",
            trainer.app_id,
            colorize_status(trainer.status)
        );
    }

    println!(
        "    Connected:    {}",
        worker
            .connected_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(refreshed) = worker.last_refreshed_at {
        println!(
            "    Refreshed:    {}",
            refreshed.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    println!();
}
