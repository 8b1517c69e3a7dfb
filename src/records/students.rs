//! Student registration, profile updates and removal.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{require_email, require_non_empty, Change, RecordError};
use crate::changelog::{Operation, WatchedTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub student_id: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub course: String,
    pub section: String,
    pub trimester: String,
    pub email: String,
}

impl NewStudent {
    pub fn full_name(&self) -> String {
        match self.middle_name.as_deref().filter(|m| !m.trim().is_empty()) {
            Some(middle) => format!("{} {} {}", self.first_name, middle, self.last_name),
            None => format!("{} {}", self.first_name, self.last_name),
        }
    }

    fn validate(&self) -> Result<(), RecordError> {
        require_non_empty("studentId", &self.student_id)?;
        require_non_empty("firstName", &self.first_name)?;
        require_non_empty("lastName", &self.last_name)?;
        require_non_empty("course", &self.course)?;
        require_non_empty("section", &self.section)?;
        require_non_empty("trimester", &self.trimester)?;
        require_email(&self.email)
    }
}

/// Fields a student may change; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentUpdate {
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub trimester: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl StudentUpdate {
    fn assignments(&self) -> Result<Vec<(&'static str, &str)>, RecordError> {
        let mut set = Vec::new();
        for (column, value) in [
            ("course", &self.course),
            ("section", &self.section),
            ("trimester", &self.trimester),
            ("email", &self.email),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                if column == "email" {
                    require_email(value)?;
                }
                set.push((column, value));
            }
        }
        Ok(set)
    }
}

/// Login name: two letters of each name plus the last four id characters.
///
/// ```
/// assert_eq!(gradecast::records::generate_username("Maria", "Santos", "2021-00417"), "masa0417");
/// ```
pub fn generate_username(first_name: &str, last_name: &str, student_id: &str) -> String {
    let prefix = |name: &str| name.to_lowercase().chars().take(2).collect::<String>();
    let chars: Vec<char> = student_id.chars().collect();
    let suffix: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("{}{}{}", prefix(first_name), prefix(last_name), suffix)
}

pub(super) fn insert(conn: &Connection, student: &NewStudent, now: i64) -> Result<Change, RecordError> {
    student.validate()?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_id = ?1 OR email = ?2",
            params![student.student_id, student.email],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(RecordError::Conflict(format!(
            "student {} is already registered",
            student.student_id
        )));
    }

    conn.execute(
        "INSERT INTO students (student_id, first_name, middle_name, last_name, full_name,
                               course, section, trimester, email, username, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            student.student_id,
            student.first_name,
            student.middle_name,
            student.last_name,
            student.full_name(),
            student.course,
            student.section,
            student.trimester,
            student.email,
            generate_username(&student.first_name, &student.last_name, &student.student_id),
            now,
        ],
    )?;

    Ok((WatchedTable::Students, Operation::Insert, student.student_id.clone()))
}

/// Returns `None` when the update carries no changes.
pub(super) fn update(
    conn: &Connection,
    student_id: &str,
    update: &StudentUpdate,
) -> Result<Option<Change>, RecordError> {
    if !exists(conn, student_id)? {
        return Err(not_found(student_id));
    }

    let assignments = update.assignments()?;
    if assignments.is_empty() {
        return Ok(None);
    }

    let set_clause = assignments
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE students SET {set_clause} WHERE student_id = ?{}",
        assignments.len() + 1
    );
    let values = assignments
        .iter()
        .map(|(_, value)| *value)
        .chain(std::iter::once(student_id));
    conn.execute(&sql, params_from_iter(values))?;

    Ok(Some((WatchedTable::Students, Operation::Update, student_id.to_string())))
}

pub(super) fn delete(conn: &Connection, student_id: &str) -> Result<Change, RecordError> {
    let removed = conn.execute(
        "DELETE FROM students WHERE student_id = ?1",
        params![student_id],
    )?;
    if removed == 0 {
        return Err(not_found(student_id));
    }
    Ok((WatchedTable::Students, Operation::Delete, student_id.to_string()))
}

fn exists(conn: &Connection, student_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM students WHERE student_id = ?1)",
        params![student_id],
        |row| row.get(0),
    )
}

fn not_found(student_id: &str) -> RecordError {
    RecordError::NotFound {
        table: WatchedTable::Students,
        id: student_id.to_string(),
    }
}
