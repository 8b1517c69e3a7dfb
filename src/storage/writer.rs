//! Dedicated writer thread with group commit.
//!
//! The writer owns the only read-write SQLite connection. Every mutation of
//! a watched table is applied here together with its `changes_log` row, in
//! the same savepoint, so a change can never commit without being recorded.
//!
//! Commands from async handlers arrive over a bounded channel. Whatever is
//! already queued when the writer wakes up shares one transaction, and a
//! grade upload may hold the transaction open a little longer so the rest of
//! its rows land in the same fsync. Interactive edits never wait for company.
//! Each command runs in its own savepoint: a rejected command rolls back
//! alone and the rest of the commit still goes through.

use rusqlite::Connection;
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use super::schema::{apply_pragmas, initialize_schema};
use crate::changelog::{Operation, WatchedTable};
use crate::now_millis;
use crate::records::{apply_mutation, Applied, Mutation, RecordError};

/// Error type for writer operations.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("writer channel closed")]
    ChannelClosed,

    #[error("database error: {0}")]
    Database(String),

    #[error("failed to start writer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("writer thread panicked")]
    ThreadPanic,
}

impl From<rusqlite::Error> for WriterError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

type MutationReply = oneshot::Sender<Result<Applied, RecordError>>;

enum Command {
    Mutate {
        mutation: Mutation,
        reply: MutationReply,
    },
    Compact {
        up_to_id: i64,
        older_than: i64,
        reply: oneshot::Sender<Result<usize, WriterError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct PendingMutation {
    mutation: Mutation,
    reply: MutationReply,
}

/// Bounds on one group commit.
#[derive(Debug, Clone, Copy)]
pub struct CommitLimits {
    /// Most write commands committed in one transaction
    pub max_writes: usize,
    /// How long a pending grade row waits for the rest of its upload
    pub grade_linger: Duration,
}

impl Default for CommitLimits {
    fn default() -> Self {
        Self {
            max_writes: 100,
            grade_linger: Duration::from_millis(5),
        }
    }
}

impl CommitLimits {
    /// Build from the `--batch-size` / `--batch-delay-ms` settings.
    ///
    /// A zero size would never commit, so it is clamped to one.
    pub fn from_config(batch_size: usize, batch_delay_ms: u64) -> Self {
        Self {
            max_writes: batch_size.max(1),
            grade_linger: Duration::from_millis(batch_delay_ms),
        }
    }
}

/// Mutations collected for the next commit.
struct CommitWindow {
    limits: CommitLimits,
    pending: Vec<PendingMutation>,
    /// Arrival of the first grade row in the window
    grade_since: Option<Instant>,
}

impl CommitWindow {
    fn new(limits: CommitLimits) -> Self {
        Self {
            limits,
            pending: Vec::with_capacity(limits.max_writes.min(1024)),
            grade_since: None,
        }
    }

    fn admit(&mut self, pending: PendingMutation) {
        if matches!(pending.mutation, Mutation::UpsertGrade(_)) {
            self.grade_since.get_or_insert_with(Instant::now);
        }
        self.pending.push(pending);
    }

    fn is_full(&self) -> bool {
        self.pending.len() >= self.limits.max_writes
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// How long the writer may keep collecting before it must commit.
    ///
    /// `None` when nothing is pending. Zero means commit once the commands
    /// already queued have been taken in.
    fn wait_budget(&self) -> Option<Duration> {
        if self.pending.is_empty() {
            return None;
        }
        if self.is_full() {
            return Some(Duration::ZERO);
        }
        Some(match self.grade_since {
            Some(since) => self.limits.grade_linger.saturating_sub(since.elapsed()),
            None => Duration::ZERO,
        })
    }

    fn take(&mut self) -> Vec<PendingMutation> {
        self.grade_since = None;
        std::mem::take(&mut self.pending)
    }
}

/// Cloneable handle used by request handlers to submit writes.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Command>,
}

impl WriterHandle {
    /// Apply a watched-table mutation and its change-log entry.
    ///
    /// Resolves after the enclosing batch has been committed.
    pub async fn apply(&self, mutation: Mutation) -> Result<Applied, RecordError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Mutate { mutation, reply })
            .await
            .map_err(|_| WriterError::ChannelClosed)?;
        rx.await.map_err(|_| WriterError::ChannelClosed)?
    }

    /// Append a change-log entry for a mutation made outside this writer.
    ///
    /// Returns the assigned change id.
    pub async fn record(
        &self,
        table: WatchedTable,
        operation: Operation,
        record_id: impl Into<String>,
    ) -> Result<i64, RecordError> {
        let applied = self
            .apply(Mutation::Record {
                table,
                operation,
                record_id: record_id.into(),
            })
            .await?;
        applied
            .change_id
            .ok_or_else(|| WriterError::Database("change was not recorded".into()).into())
    }

    /// Delete delivered log rows (`id <= up_to_id`) written before `older_than`.
    ///
    /// Returns the number of rows removed.
    pub async fn compact(&self, up_to_id: i64, older_than: i64) -> Result<usize, WriterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Compact {
                up_to_id,
                older_than,
                reply,
            })
            .await
            .map_err(|_| WriterError::ChannelClosed)?;
        rx.await.map_err(|_| WriterError::ChannelClosed)?
    }

    /// Flush pending writes and stop the writer thread.
    pub async fn shutdown(&self) -> Result<(), WriterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| WriterError::ChannelClosed)?;
        rx.await.map_err(|_| WriterError::ChannelClosed)
    }
}

/// Owner of the writer thread.
pub struct Writer {
    handle: WriterHandle,
    thread: JoinHandle<()>,
}

impl Writer {
    /// Open (and initialize) the database and start the writer thread.
    pub fn spawn<P: AsRef<Path>>(
        db_path: P,
        channel_size: usize,
        limits: CommitLimits,
    ) -> Result<Self, WriterError> {
        let conn = Connection::open(db_path)?;
        apply_pragmas(&conn)?;
        initialize_schema(&conn)?;

        let (tx, rx) = mpsc::channel(channel_size.max(1));
        let thread = thread::Builder::new()
            .name("gradecast-writer".into())
            .spawn(move || run_writer(conn, rx, limits))?;

        tracing::debug!(
            max_writes = limits.max_writes,
            grade_linger_ms = limits.grade_linger.as_millis() as u64,
            "Writer thread started"
        );

        Ok(Self {
            handle: WriterHandle { tx },
            thread,
        })
    }

    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Wait for the writer thread to exit.
    pub fn join(self) -> Result<(), WriterError> {
        drop(self.handle);
        self.thread.join().map_err(|_| WriterError::ThreadPanic)
    }
}

enum Wait {
    Command(Command),
    Commit,
    Closed,
}

fn run_writer(mut conn: Connection, mut rx: mpsc::Receiver<Command>, limits: CommitLimits) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Writer could not build its timer runtime");
            return;
        }
    };

    let mut window = CommitWindow::new(limits);
    let mut shutdown_reply = None;

    loop {
        let wait = match window.wait_budget() {
            None => runtime.block_on(async {
                rx.recv().await.map_or(Wait::Closed, Wait::Command)
            }),
            // Only what is already queued joins the commit
            Some(budget) if budget.is_zero() => match rx.try_recv() {
                Ok(cmd) => Wait::Command(cmd),
                Err(TryRecvError::Empty) => Wait::Commit,
                Err(TryRecvError::Disconnected) => Wait::Closed,
            },
            Some(budget) => runtime.block_on(async {
                match tokio::time::timeout(budget, rx.recv()).await {
                    Ok(Some(cmd)) => Wait::Command(cmd),
                    Ok(None) => Wait::Closed,
                    Err(_) => Wait::Commit,
                }
            }),
        };

        match wait {
            Wait::Command(Command::Mutate { mutation, reply }) => {
                window.admit(PendingMutation { mutation, reply });
                if window.is_full() {
                    commit_batch(&mut conn, window.take());
                }
            }
            Wait::Command(Command::Compact {
                up_to_id,
                older_than,
                reply,
            }) => {
                // Keep write ordering: anything queued before the compaction lands first
                if !window.is_empty() {
                    commit_batch(&mut conn, window.take());
                }
                let _ = reply.send(compact(&conn, up_to_id, older_than));
            }
            Wait::Command(Command::Shutdown { reply }) => {
                shutdown_reply = Some(reply);
                break;
            }
            Wait::Commit => commit_batch(&mut conn, window.take()),
            Wait::Closed => break,
        }
    }

    // Drain whatever is still queued so no caller is left without a reply
    rx.close();
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            Command::Mutate { mutation, reply } => {
                window.admit(PendingMutation { mutation, reply });
            }
            Command::Compact { reply, .. } => {
                let _ = reply.send(Err(WriterError::ChannelClosed));
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
    if !window.is_empty() {
        commit_batch(&mut conn, window.take());
    }

    tracing::info!("Writer thread stopped");
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

/// Run a batch in one transaction, one savepoint per command.
fn commit_batch(conn: &mut Connection, batch: Vec<PendingMutation>) {
    if batch.is_empty() {
        return;
    }
    let size = batch.len();
    let now = now_millis();

    let mut tx = match conn.transaction() {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!(error = %e, "Failed to begin write transaction");
            fail_all(batch, &e.to_string());
            return;
        }
    };

    let mut outcomes = Vec::with_capacity(size);
    for pending in batch {
        let result = match tx.savepoint() {
            // An uncommitted savepoint rolls back when dropped
            Ok(sp) => apply_mutation(&sp, &pending.mutation, now).and_then(|applied| {
                sp.commit().map(|()| applied).map_err(RecordError::from)
            }),
            Err(e) => Err(RecordError::from(e)),
        };
        outcomes.push((pending.reply, result));
    }

    if let Err(e) = tx.commit() {
        tracing::error!(error = %e, batch_size = size, "Failed to commit write batch");
        let message = e.to_string();
        for (reply, _) in outcomes {
            let _ = reply.send(Err(WriterError::Database(message.clone()).into()));
        }
        return;
    }

    tracing::trace!(batch_size = size, "Write batch committed");
    for (reply, result) in outcomes {
        let _ = reply.send(result);
    }
}

fn fail_all(batch: Vec<PendingMutation>, message: &str) {
    for pending in batch {
        let _ = pending
            .reply
            .send(Err(WriterError::Database(message.to_string()).into()));
    }
}

fn compact(conn: &Connection, up_to_id: i64, older_than: i64) -> Result<usize, WriterError> {
    let removed = conn.execute(
        "DELETE FROM changes_log WHERE id <= ?1 AND timestamp < ?2",
        rusqlite::params![up_to_id, older_than],
    )?;
    if removed > 0 {
        tracing::debug!(removed, up_to_id, "Compacted change log");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{GradeRow, NewTeacher};
    use tempfile::TempDir;

    fn pending(mutation: Mutation) -> PendingMutation {
        let (reply, _rx) = oneshot::channel();
        PendingMutation { mutation, reply }
    }

    fn grade(student_num: &str) -> Mutation {
        Mutation::UpsertGrade(GradeRow {
            student_num: student_num.into(),
            course_code: "CS101".into(),
            faculty_id: "F1".into(),
            prelim_grade: Some(1.5),
            midterm_grade: None,
            final_grade: None,
        })
    }

    fn teacher(email: &str) -> Mutation {
        Mutation::RegisterTeacher(NewTeacher {
            teacher_name: "Ada Reyes".into(),
            email: email.into(),
        })
    }

    #[test]
    fn test_interactive_edit_does_not_linger() {
        let mut window = CommitWindow::new(CommitLimits {
            max_writes: 100,
            grade_linger: Duration::from_secs(10),
        });
        assert_eq!(window.wait_budget(), None);

        window.admit(pending(teacher("ada@school.edu")));
        assert_eq!(window.wait_budget(), Some(Duration::ZERO));
    }

    #[test]
    fn test_grade_rows_linger_until_full() {
        let mut window = CommitWindow::new(CommitLimits {
            max_writes: 2,
            grade_linger: Duration::from_secs(10),
        });

        window.admit(pending(grade("S1")));
        let budget = window.wait_budget().unwrap();
        assert!(budget > Duration::from_secs(5));

        window.admit(pending(grade("S2")));
        assert!(window.is_full());
        assert_eq!(window.wait_budget(), Some(Duration::ZERO));

        assert_eq!(window.take().len(), 2);
        assert_eq!(window.wait_budget(), None);

        // Linger restarts with the next upload
        window.admit(pending(teacher("bea@school.edu")));
        assert_eq!(window.wait_budget(), Some(Duration::ZERO));
    }

    #[test]
    fn test_zero_write_limit_is_clamped() {
        let limits = CommitLimits::from_config(0, 5);
        assert_eq!(limits.max_writes, 1);
        assert_eq!(limits.grade_linger, Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_registration_ignores_grade_linger() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let limits = CommitLimits {
            max_writes: 100,
            grade_linger: Duration::from_secs(10),
        };
        let writer = Writer::spawn(&db_path, 16, limits).unwrap();
        let handle = writer.handle();

        let applied = tokio::time::timeout(
            Duration::from_secs(2),
            handle.apply(teacher("ada@school.edu")),
        )
        .await
        .expect("registration waited for the grade linger")
        .unwrap();
        assert!(applied.change_id.is_some());

        handle.shutdown().await.unwrap();
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn test_full_grade_upload_commits_early() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let limits = CommitLimits {
            max_writes: 2,
            grade_linger: Duration::from_secs(10),
        };
        let writer = Writer::spawn(&db_path, 16, limits).unwrap();
        let handle = writer.handle();

        let (a, b) = tokio::time::timeout(Duration::from_secs(2), async {
            tokio::join!(handle.apply(grade("S1")), handle.apply(grade("S2")))
        })
        .await
        .expect("a full upload should not wait for the linger");
        assert!(a.is_ok() && b.is_ok());

        handle.shutdown().await.unwrap();
        writer.join().unwrap();
        assert_eq!(count_changes(&db_path), 2);
    }

    fn count_changes(db_path: &Path) -> i64 {
        let conn = Connection::open(db_path).unwrap();
        conn.query_row("SELECT COUNT(*) FROM changes_log", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_assigns_increasing_ids() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let writer = Writer::spawn(&db_path, 16, CommitLimits::default()).unwrap();
        let handle = writer.handle();

        let first = handle
            .record(WatchedTable::Students, Operation::Insert, "S1")
            .await
            .unwrap();
        let second = handle
            .record(WatchedTable::Students, Operation::Update, "S1")
            .await
            .unwrap();
        assert!(second > first);

        handle.shutdown().await.unwrap();
        writer.join().unwrap();
        assert_eq!(count_changes(&db_path), 2);
    }

    #[tokio::test]
    async fn test_failed_command_does_not_poison_batch() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let limits = CommitLimits {
            max_writes: 3,
            grade_linger: Duration::from_millis(50),
        };
        let writer = Writer::spawn(&db_path, 16, limits).unwrap();
        let handle = writer.handle();

        // Second registration collides on email
        let (a, b, c) = tokio::join!(
            handle.apply(teacher("ada@school.edu")),
            handle.apply(teacher("ada@school.edu")),
            handle.apply(teacher("bea@school.edu")),
        );
        let outcomes = [a.is_ok(), b.is_ok(), c.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 2);
        assert!(c.is_ok());

        handle.shutdown().await.unwrap();
        writer.join().unwrap();

        // Only the two accepted registrations left a trace
        assert_eq!(count_changes(&db_path), 2);
    }

    #[tokio::test]
    async fn test_compact_only_removes_delivered_rows() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let writer = Writer::spawn(&db_path, 16, CommitLimits::default()).unwrap();
        let handle = writer.handle();

        let first = handle
            .record(WatchedTable::Grades, Operation::Insert, "1")
            .await
            .unwrap();
        handle
            .record(WatchedTable::Grades, Operation::Insert, "2")
            .await
            .unwrap();

        let removed = handle.compact(first, i64::MAX).await.unwrap();
        assert_eq!(removed, 1);

        handle.shutdown().await.unwrap();
        writer.join().unwrap();
        assert_eq!(count_changes(&db_path), 1);
    }

    #[tokio::test]
    async fn test_apply_after_shutdown_fails() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let writer = Writer::spawn(&db_path, 16, CommitLimits::default()).unwrap();
        let handle = writer.handle();

        handle.shutdown().await.unwrap();
        writer.join().unwrap();

        let result = handle
            .record(WatchedTable::Students, Operation::Delete, "S1")
            .await;
        assert!(matches!(
            result,
            Err(RecordError::Storage(WriterError::ChannelClosed))
        ));
    }
}
