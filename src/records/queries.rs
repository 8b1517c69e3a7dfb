//! Read-only lookups for dashboards.
//!
//! Queries run on the reader pool, never on the writer thread, so a large
//! grade listing cannot delay a pending commit.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::Remark;
use crate::storage::{ReaderError, ReaderPool};

/// A stored student as returned by the lookup endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub student_id: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub full_name: String,
    pub course: String,
    pub section: String,
    pub trimester: String,
    pub email: String,
    pub username: String,
    pub created_at: i64,
}

/// A stored grade row with its computed standing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub id: i64,
    pub student_num: String,
    pub course_code: String,
    pub faculty_id: String,
    pub prelim_grade: f64,
    pub midterm_grade: f64,
    pub final_grade: f64,
    pub gwa: f64,
    pub remark: Remark,
    pub updated_at: i64,
}

/// Which grades to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeFilter {
    /// Everything a faculty member uploaded
    Faculty(String),
    /// One student's grades across courses
    Student(String),
}

const GRADE_COLUMNS: &str = "id, student_num, course_code, faculty_id, prelim_grade, \
                             midterm_grade, final_grade, gwa, remark, updated_at";

pub fn find_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<StudentRecord>> {
    conn.query_row(
        "SELECT student_id, first_name, middle_name, last_name, full_name, course, section,
                trimester, email, username, created_at
         FROM students WHERE student_id = ?1",
        params![student_id],
        |row| {
            Ok(StudentRecord {
                student_id: row.get(0)?,
                first_name: row.get(1)?,
                middle_name: row.get(2)?,
                last_name: row.get(3)?,
                full_name: row.get(4)?,
                course: row.get(5)?,
                section: row.get(6)?,
                trimester: row.get(7)?,
                email: row.get(8)?,
                username: row.get(9)?,
                created_at: row.get(10)?,
            })
        },
    )
    .optional()
}

/// Grades matching `filter`, ordered by course then student.
pub fn list_grades(conn: &Connection, filter: &GradeFilter) -> rusqlite::Result<Vec<GradeRecord>> {
    let (column, value) = match filter {
        GradeFilter::Faculty(id) => ("faculty_id", id),
        GradeFilter::Student(id) => ("student_num", id),
    };
    let sql = format!(
        "SELECT {GRADE_COLUMNS} FROM grades WHERE {column} = ?1 ORDER BY course_code, student_num"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![value], grade_from_row)?;
    rows.collect()
}

fn grade_from_row(row: &Row<'_>) -> rusqlite::Result<GradeRecord> {
    Ok(GradeRecord {
        id: row.get(0)?,
        student_num: row.get(1)?,
        course_code: row.get(2)?,
        faculty_id: row.get(3)?,
        prelim_grade: row.get(4)?,
        midterm_grade: row.get(5)?,
        final_grade: row.get(6)?,
        gwa: row.get(7)?,
        remark: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Async lookups over the reader pool.
#[derive(Clone)]
pub struct RecordQueries {
    readers: ReaderPool,
}

impl RecordQueries {
    pub fn new(readers: ReaderPool) -> Self {
        Self { readers }
    }

    pub async fn student(&self, student_id: String) -> Result<Option<StudentRecord>, ReaderError> {
        let readers = self.readers.clone();
        tokio::task::spawn_blocking(move || -> Result<_, ReaderError> {
            let conn = readers.get()?;
            Ok(find_student(&conn, &student_id)?)
        })
        .await?
    }

    pub async fn grades(&self, filter: GradeFilter) -> Result<Vec<GradeRecord>, ReaderError> {
        let readers = self.readers.clone();
        tokio::task::spawn_blocking(move || -> Result<_, ReaderError> {
            let conn = readers.get()?;
            Ok(list_grades(&conn, &filter)?)
        })
        .await?
    }
}
