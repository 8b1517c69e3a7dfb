//! Gradecast: pushes grade-record changes to connected dashboards.
//!
//! # Usage
//!
//! ```bash
//! gradecast --port 5000 --data-dir ./data --log-level info
//! ```
//!
//! Environment variables can also be used:
//! - `GRADECAST_PORT`: Port to listen on
//! - `GRADECAST_DATA_DIR`: Data directory for SQLite
//! - `GRADECAST_POLL_INTERVAL_MS`: Change-log scan interval
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//! - `GRADECAST_LOG_FORMAT`: `text` or `json`

use gradecast::config::Config;
use gradecast::observability::metrics::init_metrics_with_endpoint;
use gradecast::observability::tracing::init_tracing;
use gradecast::server::run_server;
use std::fs;
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
   __ _ _ __ __ _  __| | ___  ___ __ _ ___| |_
  / _` | '__/ _` |/ _` |/ _ \/ __/ _` / __| __|
 | (_| | | | (_| | (_| |  __/ (_| (_| \__ \ |_
  \__, |_|  \__,_|\__,_|\___|\___\__,_|___/\__|
  |___/

  Gradecast v{} - grade-record change notifications

  Configuration:
    Address:        {}:{}
    Data Dir:       {}
    Poll Interval:  {} ms
    Replay History: {}
    Log Level:      {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.host,
        config.port,
        config.data_dir.display(),
        config.poll_interval_ms,
        config.replay_history,
        config.log_level
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    init_tracing(&config.log_level, config.log_format);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    // Ensure data directory exists
    fs::create_dir_all(&config.data_dir)?;

    print_banner(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn signal handler task
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating shutdown...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
                    let _ = ctrl_c.await;
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        let _ = shutdown_tx.send(true);
    });

    run_server(config, shutdown_rx).await?;

    tracing::info!("Gradecast shutdown complete");
    Ok(())
}
