//! Configuration parsing for the Gradecast server.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::notify::poller::CursorSeed;
use crate::observability::tracing::LogFormat;

/// Gradecast: pushes grade-record changes to connected dashboards.
#[derive(Parser, Debug, Clone)]
#[command(name = "gradecast")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "GRADECAST_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on (HTTP API and WebSocket endpoint)
    #[arg(short, long, env = "GRADECAST_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Data directory for SQLite database
    #[arg(short, long, env = "GRADECAST_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Log line format
    #[arg(long, env = "GRADECAST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Interval between change-log scans in milliseconds (at least 1)
    #[arg(
        long,
        env = "GRADECAST_POLL_INTERVAL_MS",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_ms: u64,

    /// Replay the whole change log to clients on startup instead of
    /// starting from the newest entry
    #[arg(long, env = "GRADECAST_REPLAY_HISTORY")]
    pub replay_history: bool,

    /// Maximum number of log entries read in one tick
    #[arg(long, env = "GRADECAST_MAX_BATCH", default_value_t = 10_000)]
    pub max_batch: usize,

    /// Size of the write channel (backpressure control)
    #[arg(long, env = "GRADECAST_WRITE_CHANNEL_SIZE", default_value_t = 1000)]
    pub write_channel_size: usize,

    /// Maximum number of writes committed in one transaction
    #[arg(long, env = "GRADECAST_BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,

    /// Maximum time to wait for a full write batch in milliseconds
    #[arg(long, env = "GRADECAST_BATCH_DELAY_MS", default_value_t = 5)]
    pub batch_delay_ms: u64,

    /// Size of the reader connection pool
    #[arg(long, env = "GRADECAST_READER_POOL_SIZE", default_value_t = 10)]
    pub reader_pool_size: u32,

    /// Number of undelivered messages buffered per client
    #[arg(long, env = "GRADECAST_CLIENT_BUFFER", default_value_t = 64)]
    pub client_buffer: usize,

    /// Upper bound for a single WebSocket send in milliseconds
    #[arg(long, env = "GRADECAST_SEND_TIMEOUT_MS", default_value_t = 5000)]
    pub send_timeout_ms: u64,

    /// Delete delivered change-log rows older than this many seconds
    /// (disabled when unset)
    #[arg(long, env = "GRADECAST_RETENTION_SECS")]
    pub retention_secs: Option<u64>,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Path of the SQLite database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("gradecast.db")
    }

    /// Poll period; never zero, even when the field was set in code.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }

    /// Where the poller cursor starts when the process boots.
    pub fn cursor_seed(&self) -> CursorSeed {
        if self.replay_history {
            CursorSeed::Beginning
        } else {
            CursorSeed::Latest
        }
    }

    /// Create a configuration for tests: loopback, random port, fast ticks.
    pub fn test_config(data_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0, // Random port
            data_dir,
            log_level: "debug".into(),
            log_format: LogFormat::Text,
            poll_interval_ms: 50,
            replay_history: false,
            max_batch: 1000,
            write_channel_size: 100,
            batch_size: 1,
            batch_delay_ms: 1,
            reader_pool_size: 5,
            client_buffer: 16,
            send_timeout_ms: 1000,
            retention_secs: None,
            otel_endpoint: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            data_dir: PathBuf::from("./data"),
            log_level: "info".into(),
            log_format: LogFormat::Text,
            poll_interval_ms: 1000,
            replay_history: false,
            max_batch: 10_000,
            write_channel_size: 1000,
            batch_size: 100,
            batch_delay_ms: 5,
            reader_pool_size: 10,
            client_buffer: 64,
            send_timeout_ms: 5000,
            retention_secs: None,
            otel_endpoint: None,
        }
    }
}
