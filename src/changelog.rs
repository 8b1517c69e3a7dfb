//! Change-log entry model and the grouped wire message.
//!
//! Clients never see individual entries. Each tick's batch is folded into
//! `"{table}_{operation}" -> [record_id, ...]` buckets so a dashboard can
//! react to "which rows of which table changed, and how".

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Upper-case form stored in the `operation` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Lower-case form used in grouping keys.
    pub fn as_key_suffix(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown change operation: {0}")]
pub struct OperationParseError(pub String);

impl FromStr for Operation {
    type Err = OperationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(OperationParseError(other.to_string())),
        }
    }
}

/// Tables whose mutations are pushed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedTable {
    Students,
    Grades,
    Teachers,
}

impl WatchedTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::Grades => "grades",
            Self::Teachers => "teachers",
        }
    }
}

impl fmt::Display for WatchedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only `changes_log` table.
///
/// `id` is the resume cursor; `timestamp` is informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub table_name: String,
    pub operation: Operation,
    pub record_id: String,
    pub timestamp: i64,
}

impl ChangeLogEntry {
    /// Grouping key, e.g. `students_update`.
    pub fn group_key(&self) -> String {
        format!("{}_{}", self.table_name, self.operation.as_key_suffix())
    }
}

/// Record ids per `"{table}_{operation}"` key, in batch order.
pub type GroupedChanges = BTreeMap<String, Vec<String>>;

/// Fold a batch into per-table/per-operation buckets.
///
/// Nothing is dropped or deduplicated: a row updated twice in one batch
/// shows up twice in its bucket.
pub fn group_changes(entries: &[ChangeLogEntry]) -> GroupedChanges {
    let mut grouped = GroupedChanges::new();
    for entry in entries {
        grouped
            .entry(entry.group_key())
            .or_default()
            .push(entry.record_id.clone());
    }
    grouped
}

/// Message pushed to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    DatabaseUpdate { changes: GroupedChanges },
}

impl ServerMessage {
    pub fn database_update(changes: GroupedChanges) -> Self {
        Self::DatabaseUpdate { changes }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
