//! Schema initialization and connection pragmas.
//!
//! `changes_log` uses `AUTOINCREMENT` so ids are strictly increasing and
//! never reused, even after compaction deletes the newest delivered rows.

use rusqlite::{params, Connection, OptionalExtension};

use crate::changelog::{Operation, WatchedTable};

/// Apply pragmas for the single writer connection.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    Ok(())
}

/// Apply pragmas for pooled read-only connections.
pub fn apply_reader_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "query_only", "ON")?;
    Ok(())
}

/// Create the change log and the watched tables if they do not exist.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS changes_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('INSERT', 'UPDATE', 'DELETE')),
            record_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS students (
            student_id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            last_name TEXT NOT NULL,
            full_name TEXT NOT NULL,
            course TEXT NOT NULL,
            section TEXT NOT NULL,
            trimester TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS teachers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            teacher_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS grades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_num TEXT NOT NULL,
            course_code TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            prelim_grade REAL NOT NULL,
            midterm_grade REAL NOT NULL,
            final_grade REAL NOT NULL,
            gwa REAL NOT NULL,
            remark TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (student_num, course_code)
        );
        CREATE INDEX IF NOT EXISTS idx_grades_faculty ON grades(faculty_id);
        "#,
    )
}

/// Append one entry to the change log, returning its id.
///
/// Callers run this inside the same transaction (or savepoint) as the
/// mutation it describes.
pub fn insert_change(
    conn: &Connection,
    table: WatchedTable,
    operation: Operation,
    record_id: &str,
    timestamp: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO changes_log (table_name, operation, record_id, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![table.as_str(), operation.as_str(), record_id, timestamp],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Highest change id ever assigned, 0 when the log has never been written.
///
/// Reads `sqlite_sequence` so compaction of the newest rows cannot make the
/// counter appear to go backwards.
pub fn max_change_id(conn: &Connection) -> rusqlite::Result<i64> {
    let seq: Option<i64> = conn
        .query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = 'changes_log'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(seq.unwrap_or(0))
}
