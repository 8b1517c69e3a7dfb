//! gradecastctl: Command-line client for Gradecast.
//!
//! Connects to a Gradecast server over WebSocket and prints the change
//! notifications it pushes.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;

/// Command-line client for Gradecast change notifications.
#[derive(Parser)]
#[command(name = "gradecastctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Gradecast WebSocket endpoint (e.g., ws://localhost:5000/ws)
    #[arg(short, long, env = "GRADECAST_ENDPOINT", default_value = "ws://localhost:5000/ws")]
    endpoint: String,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Watch change notifications, reconnecting when the connection drops
    Watch {
        /// Seconds to wait before reconnecting
        #[arg(long, default_value = "5")]
        reconnect_delay_secs: u64,
        /// Maximum number of notifications to print (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        count: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            reconnect_delay_secs,
            count,
        } => {
            let options = commands::watch::WatchOptions {
                endpoint: cli.endpoint,
                reconnect_delay: Duration::from_secs(reconnect_delay_secs),
                count,
            };
            commands::watch::run(options, cli.output).await?;
        }
    }

    Ok(())
}
