mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::CliConfig;
use drawlive_core::Station;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "drawlive")]
#[command(about = "Live lottery draw viewer")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Results server WebSocket URL
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a station's draw as it is revealed
    Watch {
        /// Station id, e.g. mien-bac
        station: String,
        /// Bearer token (falls back to DRAWLIVE_TOKEN, then the config file)
        #[arg(short, long)]
        token: Option<String>,
    },

    /// List slots in reveal order
    Slots,

    /// Replay a saved snapshot or frame list and show the result
    Inspect {
        file: PathBuf,
        /// Print the merged record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "drawlive={}",
            log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CliConfig::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Watch { station, token } => {
            let token = config
                .resolve_token(token)
                .with_context(|| format!("no token given; use --token or set {}", config::TOKEN_ENV))?;
            let client = config.client_config(cli.server.as_deref());
            commands::handle_watch(Station::new(station), token, client, config.reveal.clone())
                .await
        }
        Commands::Slots => {
            commands::handle_slots();
            Ok(())
        }
        Commands::Inspect { file, json } => {
            commands::handle_inspect(&file, config.reveal.clone(), json).await
        }
    }
}
