//! Read connection pool for the change poller and record lookups.
//!
//! Uses r2d2 with r2d2_sqlite for pooled read access.
//! SQLite WAL mode lets the poller read while the writer commits.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::path::Path;
use thiserror::Error;

use super::schema::{apply_reader_pragmas, max_change_id};
use crate::changelog::{ChangeLogEntry, Operation, OperationParseError};

/// Error type for reader pool operations.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Failed to create connection pool: {0}")]
    PoolCreation(#[from] r2d2::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Blocking read task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Corrupt change log row {id}: {source}")]
    CorruptEntry {
        id: i64,
        source: OperationParseError,
    },
}

/// Read side of the change log as seen by the poller.
///
/// `read_since` must return every entry with `id > cursor` in ascending id
/// order (up to `limit`), and an entry observed once must stay observable.
pub trait ChangeSource: Send + Sync + 'static {
    fn read_since(&self, cursor: i64, limit: usize) -> Result<Vec<ChangeLogEntry>, ReaderError>;

    /// Highest id assigned so far, 0 when nothing was ever recorded.
    fn max_change_id(&self) -> Result<i64, ReaderError>;
}

/// Read connection pool for change-log queries.
#[derive(Clone)]
pub struct ReaderPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ReaderPool {
    /// Create a new reader pool for the given database path.
    ///
    /// The writer must have created the database first.
    pub fn new<P: AsRef<Path>>(db_path: P, max_size: u32) -> Result<Self, ReaderError> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);

        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_customizer(Box::new(ReaderConnectionCustomizer))
            .build(manager)?;

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>, ReaderError> {
        Ok(self.pool.get()?)
    }
}

impl ChangeSource for ReaderPool {
    fn read_since(&self, cursor: i64, limit: usize) -> Result<Vec<ChangeLogEntry>, ReaderError> {
        let conn = self.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, table_name, operation, record_id, timestamp
             FROM changes_log WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(rusqlite::params![cursor, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, table_name, operation, record_id, timestamp)| {
                let operation = operation
                    .parse::<Operation>()
                    .map_err(|source| ReaderError::CorruptEntry { id, source })?;
                Ok(ChangeLogEntry {
                    id,
                    table_name,
                    operation,
                    record_id,
                    timestamp,
                })
            })
            .collect()
    }

    fn max_change_id(&self) -> Result<i64, ReaderError> {
        let conn = self.get()?;
        Ok(max_change_id(&conn)?)
    }
}

/// Connection customizer that applies reader pragmas.
#[derive(Debug)]
struct ReaderConnectionCustomizer;

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for ReaderConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_reader_pragmas(conn)
    }
}
