//! Gradecast: change notifications for the grade-records service.
//!
//! Every mutation of a watched table (students, grades, teachers) appends a
//! row to an append-only `changes_log` inside the same SQLite transaction.
//! A single poller scans the log on a fixed interval and pushes one
//! `database_update` message per tick to every connected WebSocket client.
//!
//! Delivery is At-Least-Once from the log's point of view and best-effort per
//! client: a client that is not ready for a tick misses it permanently and is
//! expected to refetch through the CRUD API.
//!
//! # Modules
//!
//! - [`changelog`]: Log entry model, grouping and the wire message
//! - [`config`]: CLI and environment configuration
//! - [`notify`]: Poller, broadcaster and connection registry
//! - [`observability`]: Metrics and tracing setup
//! - [`records`]: Typed write path for the watched tables
//! - [`server`]: Server setup and lifecycle
//! - [`service`]: HTTP and WebSocket handlers
//! - [`storage`]: SQLite persistence layer

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // notify::poller::ChangePoller is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::similar_names,              // id/ids/record_id are fine
    clippy::struct_excessive_bools,     // Config structs may have flags
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod changelog;
pub mod config;
pub mod notify;
pub mod observability;
pub mod records;
pub mod server;
pub mod service;
pub mod storage;

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) connection ID.
///
/// # Example
///
/// ```
/// let id = gradecast::generate_connection_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_connection_id() -> String {
    Uuid::now_v7().to_string()
}

/// Get the current Unix timestamp in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
