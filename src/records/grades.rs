//! Grade rows: upsert on (student, course) and removal.
//!
//! Grades follow the 1.00 (highest) to 5.00 scale, so a lower average is
//! better and 3.00 is the passing line.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{require_non_empty, Change, RecordError};
use crate::changelog::{Operation, WatchedTable};

const PASSING_GWA: f64 = 3.0;

/// One uploaded grade line.
///
/// Missing term grades count as zero, matching how uploads leave blanks
/// for terms that have not been graded yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    pub student_num: String,
    pub course_code: String,
    pub faculty_id: String,
    #[serde(default)]
    pub prelim_grade: Option<f64>,
    #[serde(default)]
    pub midterm_grade: Option<f64>,
    #[serde(default)]
    pub final_grade: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Remark {
    Passed,
    Failed,
    /// Incomplete: midterm or final not graded yet.
    Inc,
}

impl Remark {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Inc => "INC",
        }
    }
}

impl FromSql for Remark {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "PASSED" => Ok(Self::Passed),
            "FAILED" => Ok(Self::Failed),
            "INC" => Ok(Self::Inc),
            other => Err(FromSqlError::Other(format!("unknown remark: {other}").into())),
        }
    }
}

impl fmt::Display for Remark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// General weighted average (two decimals) and remark for a row.
pub fn compute_standing(row: &GradeRow) -> (f64, Remark) {
    let prelim = row.prelim_grade.unwrap_or(0.0);
    let midterm = row.midterm_grade.unwrap_or(0.0);
    let final_grade = row.final_grade.unwrap_or(0.0);

    let gwa = ((prelim + midterm + final_grade) / 3.0 * 100.0).round() / 100.0;
    let remark = if midterm == 0.0 || final_grade == 0.0 {
        Remark::Inc
    } else if gwa <= PASSING_GWA {
        Remark::Passed
    } else {
        Remark::Failed
    };
    (gwa, remark)
}

fn validate(row: &GradeRow) -> Result<(), RecordError> {
    require_non_empty("studentNum", &row.student_num)?;
    require_non_empty("courseCode", &row.course_code)?;
    require_non_empty("facultyId", &row.faculty_id)?;
    for (field, value) in [
        ("prelimGrade", row.prelim_grade),
        ("midtermGrade", row.midterm_grade),
        ("finalGrade", row.final_grade),
    ] {
        if let Some(value) = value {
            if !value.is_finite() || value < 0.0 {
                return Err(RecordError::Invalid(format!("{field} must be a non-negative number")));
            }
        }
    }
    Ok(())
}

/// Insert, or update the existing row for the same student and course.
pub(super) fn upsert(conn: &Connection, row: &GradeRow, now: i64) -> Result<Change, RecordError> {
    validate(row)?;
    let (gwa, remark) = compute_standing(row);
    let prelim = row.prelim_grade.unwrap_or(0.0);
    let midterm = row.midterm_grade.unwrap_or(0.0);
    let final_grade = row.final_grade.unwrap_or(0.0);

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM grades WHERE student_num = ?1 AND course_code = ?2",
            params![row.student_num, row.course_code],
            |r| r.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE grades SET faculty_id = ?1, prelim_grade = ?2, midterm_grade = ?3,
                                   final_grade = ?4, gwa = ?5, remark = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    row.faculty_id,
                    prelim,
                    midterm,
                    final_grade,
                    gwa,
                    remark.as_str(),
                    now,
                    id
                ],
            )?;
            Ok((WatchedTable::Grades, Operation::Update, id.to_string()))
        }
        None => {
            conn.execute(
                "INSERT INTO grades (student_num, course_code, faculty_id, prelim_grade,
                                     midterm_grade, final_grade, gwa, remark, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.student_num,
                    row.course_code,
                    row.faculty_id,
                    prelim,
                    midterm,
                    final_grade,
                    gwa,
                    remark.as_str(),
                    now
                ],
            )?;
            Ok((
                WatchedTable::Grades,
                Operation::Insert,
                conn.last_insert_rowid().to_string(),
            ))
        }
    }
}

pub(super) fn delete(conn: &Connection, id: i64) -> Result<Change, RecordError> {
    let removed = conn.execute("DELETE FROM grades WHERE id = ?1", params![id])?;
    if removed == 0 {
        return Err(RecordError::NotFound {
            table: WatchedTable::Grades,
            id: id.to_string(),
        });
    }
    Ok((WatchedTable::Grades, Operation::Delete, id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::initialize_schema;

    fn row(prelim: Option<f64>, midterm: Option<f64>, final_grade: Option<f64>) -> GradeRow {
        GradeRow {
            student_num: "2021-00417".into(),
            course_code: "IT101".into(),
            faculty_id: "F-9".into(),
            prelim_grade: prelim,
            midterm_grade: midterm,
            final_grade,
        }
    }

    #[test]
    fn test_standing_passed() {
        let (gwa, remark) = compute_standing(&row(Some(1.5), Some(2.0), Some(1.75)));
        assert!((gwa - 1.75).abs() < f64::EPSILON);
        assert_eq!(remark, Remark::Passed);
    }

    #[test]
    fn test_standing_failed() {
        let (gwa, remark) = compute_standing(&row(Some(3.0), Some(3.5), Some(4.0)));
        assert!((gwa - 3.5).abs() < f64::EPSILON);
        assert_eq!(remark, Remark::Failed);
    }

    #[test]
    fn test_standing_incomplete_without_final() {
        let (_, remark) = compute_standing(&row(Some(1.0), Some(1.0), None));
        assert_eq!(remark, Remark::Inc);
    }

    #[test]
    fn test_standing_rounds_to_two_decimals() {
        let (gwa, _) = compute_standing(&row(Some(1.0), Some(1.0), Some(1.25)));
        assert!((gwa - 1.08).abs() < 1e-9);
    }

    #[test]
    fn test_upsert_inserts_then_updates_same_row() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let (_, op, id) = upsert(&conn, &row(Some(2.0), None, None), 1).unwrap();
        assert_eq!(op, Operation::Insert);

        let (_, op, same_id) = upsert(&conn, &row(Some(2.0), Some(2.0), Some(2.0)), 2).unwrap();
        assert_eq!(op, Operation::Update);
        assert_eq!(id, same_id);

        let remark: String = conn
            .query_row("SELECT remark FROM grades", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remark, "PASSED");
    }

    #[test]
    fn test_upsert_rejects_negative_grade() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        let err = upsert(&conn, &row(Some(-1.0), None, None), 1).unwrap_err();
        assert!(matches!(err, RecordError::Invalid(_)));
    }

    #[test]
    fn test_delete_missing_grade() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(matches!(delete(&conn, 99), Err(RecordError::NotFound { .. })));
    }
}
