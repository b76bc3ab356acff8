//! Chiron CLI
//!
//! Command-line interface for coordinating federated training across workers.

mod commands;
mod config;
mod id_resolver;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chiron")]
#[command(about = "Chiron federated training CLI", long_about = None)]
struct Cli {
    /// Server URL
    #[arg(long, env = "CHIRON_SERVER_URL", default_value = "http://localhost:9527")]
    server_url: String,

    /// Access token
    #[arg(long, env = "CHIRON_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Workspace whose workers to connect
    #[arg(short, long, env = "CHIRON_WORKSPACE")]
    workspace: String,

    /// Answer yes to every confirmation prompt
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chiron_session=info,chiron_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        server_url: cli.server_url,
        token: cli.token,
        workspace: cli.workspace,
        assume_yes: cli.yes,
    };

    handle_command(cli.command, &config).await
}
