//! Write path for the watched tables.
//!
//! Every mutation that touches `students`, `grades` or `teachers` is a
//! [`Mutation`] executed by the writer thread through [`apply_mutation`],
//! which appends the matching `changes_log` row on the same connection
//! before returning. There is no other code path that writes these tables,
//! so subscribers cannot silently miss a change made through this crate.
//!
//! Lookups go through [`RecordQueries`] on the reader pool instead.

mod grades;
mod queries;
mod students;
mod teachers;

pub use grades::{compute_standing, GradeRow, Remark};
pub use queries::{GradeFilter, GradeRecord, RecordQueries, StudentRecord};
pub use students::{generate_username, NewStudent, StudentUpdate};
pub use teachers::{NewTeacher, TeacherUpdate};

use rusqlite::{Connection, ErrorCode};
use thiserror::Error;

use crate::changelog::{Operation, WatchedTable};
use crate::storage::schema::insert_change;
use crate::storage::{ReaderError, WriterError, WriterHandle};

/// Error type for watched-table writes and lookups.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{table} record not found: {id}")]
    NotFound { table: WatchedTable, id: String },

    #[error("conflicting record: {0}")]
    Conflict(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] WriterError),

    #[error(transparent)]
    Read(#[from] ReaderError),
}

impl From<rusqlite::Error> for RecordError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::Conflict(err.to_string()),
            _ => Self::Storage(WriterError::from(err)),
        }
    }
}

/// A single write against a watched table.
#[derive(Debug, Clone)]
pub enum Mutation {
    RegisterStudent(NewStudent),
    UpdateStudent {
        student_id: String,
        update: StudentUpdate,
    },
    DeleteStudent {
        student_id: String,
    },
    UpsertGrade(GradeRow),
    DeleteGrade {
        id: i64,
    },
    RegisterTeacher(NewTeacher),
    UpdateTeacher {
        id: i64,
        update: TeacherUpdate,
    },
    DeleteTeacher {
        id: i64,
    },
    /// Log-only entry for a change made outside this crate.
    Record {
        table: WatchedTable,
        operation: Operation,
        record_id: String,
    },
}

/// Result of an applied mutation.
///
/// `operation` and `change_id` are `None` when the mutation turned out to be
/// a no-op (an update without any field to change).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub table: WatchedTable,
    pub record_id: String,
    pub operation: Option<Operation>,
    pub change_id: Option<i64>,
}

impl Applied {
    fn unchanged(table: WatchedTable, record_id: String) -> Self {
        Self {
            table,
            record_id,
            operation: None,
            change_id: None,
        }
    }
}

/// Execute `mutation` and record it in the change log.
///
/// Runs on the writer thread inside a savepoint; an error leaves neither the
/// row change nor its log entry behind.
pub fn apply_mutation(
    conn: &Connection,
    mutation: &Mutation,
    now: i64,
) -> Result<Applied, RecordError> {
    let (table, operation, record_id) = match mutation {
        Mutation::RegisterStudent(student) => students::insert(conn, student, now)?,
        Mutation::UpdateStudent { student_id, update } => {
            match students::update(conn, student_id, update)? {
                Some(change) => change,
                None => return Ok(Applied::unchanged(WatchedTable::Students, student_id.clone())),
            }
        }
        Mutation::DeleteStudent { student_id } => students::delete(conn, student_id)?,
        Mutation::UpsertGrade(row) => grades::upsert(conn, row, now)?,
        Mutation::DeleteGrade { id } => grades::delete(conn, *id)?,
        Mutation::RegisterTeacher(teacher) => teachers::insert(conn, teacher, now)?,
        Mutation::UpdateTeacher { id, update } => match teachers::update(conn, *id, update)? {
            Some(change) => change,
            None => return Ok(Applied::unchanged(WatchedTable::Teachers, id.to_string())),
        },
        Mutation::DeleteTeacher { id } => teachers::delete(conn, *id)?,
        Mutation::Record {
            table,
            operation,
            record_id,
        } => (*table, *operation, record_id.clone()),
    };

    let change_id = insert_change(conn, table, operation, &record_id, now)?;
    tracing::debug!(
        table = %table,
        operation = %operation,
        record_id = %record_id,
        change_id,
        "Recorded change"
    );

    Ok(Applied {
        table,
        record_id,
        operation: Some(operation),
        change_id: Some(change_id),
    })
}

/// Row change produced by a table module, before it is logged.
type Change = (WatchedTable, Operation, String);

fn require_non_empty(field: &str, value: &str) -> Result<(), RecordError> {
    if value.trim().is_empty() {
        return Err(RecordError::Invalid(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn require_email(value: &str) -> Result<(), RecordError> {
    require_non_empty("email", value)?;
    if !value.contains('@') {
        return Err(RecordError::Invalid(format!("invalid email address: {value}")));
    }
    Ok(())
}

/// Typed write API over the writer thread.
#[derive(Clone)]
pub struct RecordStore {
    writer: WriterHandle,
}

impl RecordStore {
    pub fn new(writer: WriterHandle) -> Self {
        Self { writer }
    }

    pub async fn register_student(&self, student: NewStudent) -> Result<Applied, RecordError> {
        self.writer.apply(Mutation::RegisterStudent(student)).await
    }

    pub async fn update_student(
        &self,
        student_id: impl Into<String>,
        update: StudentUpdate,
    ) -> Result<Applied, RecordError> {
        self.writer
            .apply(Mutation::UpdateStudent {
                student_id: student_id.into(),
                update,
            })
            .await
    }

    pub async fn delete_student(&self, student_id: impl Into<String>) -> Result<Applied, RecordError> {
        self.writer
            .apply(Mutation::DeleteStudent {
                student_id: student_id.into(),
            })
            .await
    }

    pub async fn upsert_grade(&self, row: GradeRow) -> Result<Applied, RecordError> {
        self.writer.apply(Mutation::UpsertGrade(row)).await
    }

    /// Upsert a whole upload. Rows are submitted concurrently so the writer
    /// can group-commit them; results come back in input order.
    pub async fn upsert_grades(&self, rows: Vec<GradeRow>) -> Vec<Result<Applied, RecordError>> {
        futures::future::join_all(rows.into_iter().map(|row| self.upsert_grade(row))).await
    }

    pub async fn delete_grade(&self, id: i64) -> Result<Applied, RecordError> {
        self.writer.apply(Mutation::DeleteGrade { id }).await
    }

    pub async fn register_teacher(&self, teacher: NewTeacher) -> Result<Applied, RecordError> {
        self.writer.apply(Mutation::RegisterTeacher(teacher)).await
    }

    pub async fn update_teacher(
        &self,
        id: i64,
        update: TeacherUpdate,
    ) -> Result<Applied, RecordError> {
        self.writer.apply(Mutation::UpdateTeacher { id, update }).await
    }

    pub async fn delete_teacher(&self, id: i64) -> Result<Applied, RecordError> {
        self.writer.apply(Mutation::DeleteTeacher { id }).await
    }

    /// Record a change made to a watched table by some other writer.
    pub async fn record(
        &self,
        table: WatchedTable,
        operation: Operation,
        record_id: impl Into<String>,
    ) -> Result<i64, RecordError> {
        self.writer.record(table, operation, record_id).await
    }
}
