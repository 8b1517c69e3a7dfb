//! Process-wide change notifier.
//!
//! Owns the connection registry, the broadcaster and the cancellable poll
//! loop. Built once at startup and handed by reference to the transport.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::broadcast::Broadcaster;
use super::poller::{ChangePoller, CursorSeed, TickOutcome};
use super::registry::ConnectionRegistry;
use crate::now_millis;
use crate::storage::{ChangeSource, ReaderError, WriterHandle};

/// Shortest accepted poll period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Minimum time between two compaction passes.
const COMPACTION_PERIOD: Duration = Duration::from_secs(60);

/// Settings for the poll loop.
#[derive(Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub seed: CursorSeed,
    pub max_batch: usize,
    pub compaction: Option<Compaction>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            seed: CursorSeed::Latest,
            max_batch: 10_000,
            compaction: None,
        }
    }
}

/// Opt-in pruning of delivered change-log rows.
#[derive(Clone)]
pub struct Compaction {
    pub writer: WriterHandle,
    pub retention: Duration,
}

/// Change-notification service: registry + broadcaster + poll task.
pub struct ChangeNotifier {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeNotifier {
    /// Create a notifier; `client_buffer` bounds each connection's queue.
    pub fn new(client_buffer: usize) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(client_buffer));
        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Token cancelled by [`shutdown`](Self::shutdown); transport tasks
    /// watch it to close their sockets.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Seed the cursor and spawn the poll loop.
    ///
    /// Calling `start` on a running notifier is a no-op.
    pub async fn start(
        &self,
        source: Arc<dyn ChangeSource>,
        settings: PollSettings,
    ) -> Result<(), ReaderError> {
        if self.lock_task().is_some() {
            tracing::warn!("Change notifier already running");
            return Ok(());
        }

        let mut poller = ChangePoller::new(source, self.broadcaster.clone(), settings.max_batch);
        poller.seed(settings.seed).await?;

        let cancel = self.cancel.clone();
        let handle = tokio::spawn(run_poll_loop(poller, settings, cancel));
        *self.lock_task() = Some(handle);
        Ok(())
    }

    /// Stop polling and close every client connection. Safe to call twice.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.lock_task().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Change poller task failed");
            }
            tracing::info!("Change notifier stopped");
        }
        self.registry.close_all();
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_poll_loop(mut poller: ChangePoller, settings: PollSettings, cancel: CancellationToken) {
    let period = settings.interval.max(MIN_POLL_INTERVAL);
    // First scan one full interval after start
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    // Slow ticks back up instead of being dropped
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut last_compaction = Instant::now();

    tracing::info!(
        interval_ms = period.as_millis() as u64,
        cursor = poller.cursor(),
        "Change poller started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let outcome = poller.tick().await;

                if let (TickOutcome::Delivered { .. }, Some(compaction)) = (outcome, &settings.compaction) {
                    if last_compaction.elapsed() >= COMPACTION_PERIOD {
                        last_compaction = Instant::now();
                        compact(compaction, poller.cursor()).await;
                    }
                }
            }
        }
    }

    tracing::info!(cursor = poller.cursor(), "Change poller stopped");
}

async fn compact(compaction: &Compaction, cursor: i64) {
    let retention_ms = i64::try_from(compaction.retention.as_millis()).unwrap_or(i64::MAX);
    let older_than = now_millis().saturating_sub(retention_ms);
    match compaction.writer.compact(cursor, older_than).await {
        Ok(removed) if removed > 0 => {
            tracing::info!(removed, cursor, "Pruned delivered change-log entries");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Change-log compaction failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{Operation, WatchedTable};
    use crate::storage::{CommitLimits, ReaderPool, Writer};
    use tempfile::TempDir;

    fn fast_settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(20),
            ..PollSettings::default()
        }
    }

    #[tokio::test]
    async fn test_notifier_delivers_recorded_changes() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let writer = Writer::spawn(&db_path, 16, CommitLimits::default()).unwrap();
        let handle = writer.handle();
        let pool = ReaderPool::new(&db_path, 2).unwrap();

        let notifier = ChangeNotifier::new(8);
        notifier.start(Arc::new(pool), fast_settings()).await.unwrap();
        let (_id, mut rx) = notifier.registry().register();

        handle
            .record(WatchedTable::Students, Operation::Update, "S100")
            .await
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for update")
            .unwrap();
        assert!(payload.contains(r#""students_update":["S100"]"#));

        notifier.shutdown().await;
        handle.shutdown().await.unwrap();
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn test_latest_seed_does_not_replay_history() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let writer = Writer::spawn(&db_path, 16, CommitLimits::default()).unwrap();
        let handle = writer.handle();
        handle
            .record(WatchedTable::Grades, Operation::Insert, "1")
            .await
            .unwrap();
        let pool = ReaderPool::new(&db_path, 2).unwrap();

        let notifier = ChangeNotifier::new(8);
        let (_id, mut rx) = notifier.registry().register();
        notifier.start(Arc::new(pool), fast_settings()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "history must not be replayed");

        notifier.shutdown().await;
        handle.shutdown().await.unwrap();
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let notifier = ChangeNotifier::new(8);
        let (_id, mut rx) = notifier.registry().register();
        let token = notifier.shutdown_token();

        notifier.shutdown().await;

        assert!(token.is_cancelled());
        assert!(notifier.registry().is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_interval_still_polls() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let writer = Writer::spawn(&db_path, 16, CommitLimits::default()).unwrap();
        let handle = writer.handle();
        let pool = ReaderPool::new(&db_path, 2).unwrap();

        let notifier = ChangeNotifier::new(8);
        let settings = PollSettings {
            interval: Duration::ZERO,
            ..PollSettings::default()
        };
        notifier.start(Arc::new(pool), settings).await.unwrap();
        let (_id, mut rx) = notifier.registry().register();

        handle
            .record(WatchedTable::Teachers, Operation::Insert, "7")
            .await
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for update")
            .unwrap();
        assert!(payload.contains(r#""teachers_insert":["7"]"#));

        notifier.shutdown().await;
        handle.shutdown().await.unwrap();
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn test_second_shutdown_is_harmless() {
        let notifier = ChangeNotifier::new(8);
        notifier.shutdown().await;
        notifier.shutdown().await;
        assert!(notifier.shutdown_token().is_cancelled());
    }
}
