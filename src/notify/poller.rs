//! Change-log poller.
//!
//! The poller is the only consistency mechanism: it owns `last_checked_id`,
//! reads everything after it, and advances it only after a successful read.
//! A failed read leaves the cursor in place, so the next tick picks up the
//! same window plus anything recorded since.

use std::sync::Arc;

use super::broadcast::{BroadcastReport, Broadcaster};
use crate::changelog::{group_changes, ServerMessage};
use crate::observability::metrics;
use crate::storage::{ChangeSource, ReaderError};

/// Where the cursor starts when the process boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorSeed {
    /// Skip history: start after the newest existing entry.
    #[default]
    Latest,
    /// Replay the whole log to whoever is connected on the first tick.
    Beginning,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No new entries; nothing was sent.
    Idle,
    /// The read failed; the cursor did not move.
    Failed,
    /// A batch was read and broadcast.
    Delivered {
        entries: usize,
        cursor: i64,
        report: BroadcastReport,
    },
}

/// Scans the change log and hands each batch to the broadcaster.
pub struct ChangePoller {
    source: Arc<dyn ChangeSource>,
    broadcaster: Broadcaster,
    last_checked_id: i64,
    max_batch: usize,
}

impl ChangePoller {
    /// Create a poller whose cursor is 0 until [`seed`](Self::seed) runs.
    pub fn new(source: Arc<dyn ChangeSource>, broadcaster: Broadcaster, max_batch: usize) -> Self {
        Self {
            source,
            broadcaster,
            last_checked_id: 0,
            max_batch: max_batch.max(1),
        }
    }

    /// Id of the last entry handed to the broadcaster.
    pub fn cursor(&self) -> i64 {
        self.last_checked_id
    }

    /// Position the cursor according to `seed`.
    pub async fn seed(&mut self, seed: CursorSeed) -> Result<i64, ReaderError> {
        self.last_checked_id = match seed {
            CursorSeed::Beginning => 0,
            CursorSeed::Latest => {
                let source = Arc::clone(&self.source);
                tokio::task::spawn_blocking(move || source.max_change_id()).await??
            }
        };
        tracing::info!(cursor = self.last_checked_id, seed = ?seed, "Change poller cursor seeded");
        Ok(self.last_checked_id)
    }

    /// Run one scan-and-dispatch cycle.
    ///
    /// The store read happens on the blocking pool; the broadcast only
    /// enqueues, so a tick completes without waiting on any client.
    pub async fn tick(&mut self) -> TickOutcome {
        metrics::record_tick();

        let source = Arc::clone(&self.source);
        let cursor = self.last_checked_id;
        let limit = self.max_batch;
        let entries = match tokio::task::spawn_blocking(move || source.read_since(cursor, limit)).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, cursor, "Change log read failed, retrying next tick");
                metrics::record_poll_error();
                return TickOutcome::Failed;
            }
            Err(e) => {
                tracing::error!(error = %e, cursor, "Change log read task failed");
                metrics::record_poll_error();
                return TickOutcome::Failed;
            }
        };

        let Some(last) = entries.last().map(|entry| entry.id) else {
            return TickOutcome::Idle;
        };

        let message = ServerMessage::database_update(group_changes(&entries));
        let report = match self.broadcaster.broadcast(&message) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, cursor, "Failed to serialize change batch");
                return TickOutcome::Failed;
            }
        };
        self.last_checked_id = last;

        tracing::debug!(
            entries = entries.len(),
            cursor = last,
            delivered = report.delivered,
            skipped = report.skipped,
            removed = report.removed,
            "Broadcast database update"
        );
        metrics::record_broadcast(entries.len(), &report);

        TickOutcome::Delivered {
            entries: entries.len(),
            cursor: last,
            report,
        }
    }
}
