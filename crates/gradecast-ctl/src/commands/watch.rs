//! Watch command implementation.
//!
//! Reconnects after a fixed delay whenever the connection fails or closes.
//! Notifications pushed while disconnected are not recovered.

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::signal;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::OutputFormat;

pub struct WatchOptions {
    pub endpoint: String,
    pub reconnect_delay: Duration,
    /// 0 = unlimited
    pub count: u64,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    DatabaseUpdate {
        changes: BTreeMap<String, Vec<String>>,
    },
    #[serde(other)]
    Unknown,
}

enum SessionEnd {
    Closed,
    LimitReached,
}

pub async fn run(options: WatchOptions, format: OutputFormat) -> Result<()> {
    let mut received: u64 = 0;

    if format == OutputFormat::Text {
        eprintln!("Watching {} (Ctrl+C to stop)...\n", options.endpoint);
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            result = watch_once(&options, format, &mut received) => match result {
                Ok(SessionEnd::LimitReached) => {
                    if format == OutputFormat::Text {
                        eprintln!("\nReached notification limit ({})", options.count);
                    }
                    return Ok(());
                }
                Ok(SessionEnd::Closed) => eprintln!("Connection closed by server"),
                Err(e) => eprintln!("Connection error: {:#}", e),
            }
        }

        eprintln!(
            "Reconnecting in {}s...",
            options.reconnect_delay.as_secs_f32()
        );
        tokio::select! {
            _ = signal::ctrl_c() => break,
            () = tokio::time::sleep(options.reconnect_delay) => {}
        }
    }

    if format == OutputFormat::Text {
        eprintln!("\nReceived {} notification(s)", received);
    }
    Ok(())
}

async fn watch_once(
    options: &WatchOptions,
    format: OutputFormat,
    received: &mut u64,
) -> Result<SessionEnd> {
    let (mut stream, _) = connect_async(options.endpoint.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", options.endpoint))?;
    tracing::debug!(endpoint = %options.endpoint, "Connected");

    while let Some(frame) = stream.next().await {
        let text = match frame.context("failed to read from server")? {
            Message::Text(text) => text,
            Message::Close(_) => return Ok(SessionEnd::Closed),
            _ => continue,
        };

        let message: ServerMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed message");
                continue;
            }
        };
        let ServerMessage::DatabaseUpdate { changes } = message else {
            tracing::debug!("Ignoring unknown message type");
            continue;
        };

        *received += 1;
        match format {
            OutputFormat::Text => println!("{}", render_text(*received, &changes)),
            OutputFormat::Json => println!("{}", text),
        }

        if options.count > 0 && *received >= options.count {
            return Ok(SessionEnd::LimitReached);
        }
    }

    Ok(SessionEnd::Closed)
}

fn render_text(seq: u64, changes: &BTreeMap<String, Vec<String>>) -> String {
    let groups: Vec<String> = changes
        .iter()
        .map(|(key, ids)| format!("{}=[{}]", key, ids.join(",")))
        .collect();
    format!("#{} database_update {}", seq, groups.join(" "))
}
