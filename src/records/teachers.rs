//! Teacher accounts.

use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};

use super::{require_email, require_non_empty, Change, RecordError};
use crate::changelog::{Operation, WatchedTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTeacher {
    pub teacher_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherUpdate {
    #[serde(default)]
    pub teacher_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

pub(super) fn insert(conn: &Connection, teacher: &NewTeacher, now: i64) -> Result<Change, RecordError> {
    require_non_empty("teacherName", &teacher.teacher_name)?;
    require_email(&teacher.email)?;

    conn.execute(
        "INSERT INTO teachers (teacher_name, email, created_at) VALUES (?1, ?2, ?3)",
        params![teacher.teacher_name, teacher.email, now],
    )?;
    Ok((
        WatchedTable::Teachers,
        Operation::Insert,
        conn.last_insert_rowid().to_string(),
    ))
}

pub(super) fn update(
    conn: &Connection,
    id: i64,
    update: &TeacherUpdate,
) -> Result<Option<Change>, RecordError> {
    let found: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM teachers WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    if !found {
        return Err(not_found(id));
    }

    let mut columns = Vec::new();
    let mut values: Vec<&str> = Vec::new();
    if let Some(name) = update.teacher_name.as_deref().filter(|v| !v.trim().is_empty()) {
        columns.push("teacher_name");
        values.push(name);
    }
    if let Some(email) = update.email.as_deref().filter(|v| !v.trim().is_empty()) {
        require_email(email)?;
        columns.push("email");
        values.push(email);
    }
    if columns.is_empty() {
        return Ok(None);
    }

    let set_clause = columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let id_text = id.to_string();
    values.push(&id_text);
    conn.execute(
        &format!("UPDATE teachers SET {set_clause} WHERE id = ?{}", values.len()),
        params_from_iter(values),
    )?;

    Ok(Some((WatchedTable::Teachers, Operation::Update, id_text)))
}

pub(super) fn delete(conn: &Connection, id: i64) -> Result<Change, RecordError> {
    let removed = conn.execute("DELETE FROM teachers WHERE id = ?1", params![id])?;
    if removed == 0 {
        return Err(not_found(id));
    }
    Ok((WatchedTable::Teachers, Operation::Delete, id.to_string()))
}

fn not_found(id: i64) -> RecordError {
    RecordError::NotFound {
        table: WatchedTable::Teachers,
        id: id.to_string(),
    }
}
