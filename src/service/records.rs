//! JSON API for the watched tables.
//!
//! Thin handlers over [`RecordStore`] and [`RecordQueries`]; every
//! successful write reaches subscribers through the change log on the next
//! poll tick.
//!
//! [`RecordStore`]: crate::records::RecordStore
//! [`RecordQueries`]: crate::records::RecordQueries

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::changelog::WatchedTable;
use crate::records::{
    generate_username, Applied, GradeFilter, GradeRecord, GradeRow, NewStudent, NewTeacher,
    RecordError, StudentRecord, StudentUpdate, TeacherUpdate,
};
use crate::server::ServerState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub success: bool,
    pub table: String,
    pub record_id: String,
    /// `None` when nothing changed.
    pub operation: Option<String>,
    pub change_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl From<Applied> for WriteResponse {
    fn from(applied: Applied) -> Self {
        Self {
            success: true,
            table: applied.table.to_string(),
            record_id: applied.record_id,
            operation: applied.operation.map(|op| op.to_string()),
            change_id: applied.change_id,
            username: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub count: usize,
    pub errors: Vec<UploadError>,
}

#[derive(Debug, Serialize)]
pub struct StudentResponse {
    pub success: bool,
    pub student: StudentRecord,
}

#[derive(Debug, Serialize)]
pub struct GradesResponse {
    pub success: bool,
    pub grades: Vec<GradeRecord>,
}

/// `GET /api/grades` parameters; `teacherId` wins when both are given.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeQuery {
    pub teacher_id: Option<String>,
    pub student_id: Option<String>,
}

impl GradeQuery {
    fn filter(self) -> Option<GradeFilter> {
        let present = |v: &String| !v.trim().is_empty();
        match (self.teacher_id.filter(present), self.student_id.filter(present)) {
            (Some(teacher), _) => Some(GradeFilter::Faculty(teacher)),
            (None, Some(student)) => Some(GradeFilter::Student(student)),
            (None, None) => None,
        }
    }
}

/// Error response: `{"success": false, "message": ...}`.
pub struct ApiError(RecordError);

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        Self(err)
    }
}

fn status_for(err: &RecordError) -> StatusCode {
    match err {
        RecordError::NotFound { .. } => StatusCode::NOT_FOUND,
        RecordError::Conflict(_) => StatusCode::CONFLICT,
        RecordError::Invalid(_) => StatusCode::BAD_REQUEST,
        RecordError::Storage(_) | RecordError::Read(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = Json(serde_json::json!({
            "success": false,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn register_student(
    State(state): State<Arc<ServerState>>,
    Json(student): Json<NewStudent>,
) -> ApiResult<WriteResponse> {
    let username = generate_username(&student.first_name, &student.last_name, &student.student_id);
    let applied = state.records.register_student(student).await?;
    Ok(Json(WriteResponse {
        username: Some(username),
        ..WriteResponse::from(applied)
    }))
}

pub async fn get_student(
    State(state): State<Arc<ServerState>>,
    Path(student_id): Path<String>,
) -> ApiResult<StudentResponse> {
    match state
        .queries
        .student(student_id.clone())
        .await
        .map_err(RecordError::from)?
    {
        Some(student) => Ok(Json(StudentResponse {
            success: true,
            student,
        })),
        None => Err(RecordError::NotFound {
            table: WatchedTable::Students,
            id: student_id,
        }
        .into()),
    }
}

pub async fn update_student(
    State(state): State<Arc<ServerState>>,
    Path(student_id): Path<String>,
    Json(update): Json<StudentUpdate>,
) -> ApiResult<WriteResponse> {
    let applied = state.records.update_student(student_id, update).await?;
    Ok(Json(applied.into()))
}

pub async fn delete_student(
    State(state): State<Arc<ServerState>>,
    Path(student_id): Path<String>,
) -> ApiResult<WriteResponse> {
    let applied = state.records.delete_student(student_id).await?;
    Ok(Json(applied.into()))
}

/// Upsert a batch of grade rows; rows are accepted or rejected individually.
pub async fn upload_grades(
    State(state): State<Arc<ServerState>>,
    Json(rows): Json<Vec<GradeRow>>,
) -> Response {
    let submitted = rows.len();
    let results = state.records.upsert_grades(rows).await;

    let mut count = 0;
    let mut errors = Vec::new();
    let mut storage_failure = false;
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(_) => count += 1,
            Err(e) => {
                storage_failure |= matches!(e, RecordError::Storage(_));
                errors.push(UploadError {
                    index,
                    message: e.to_string(),
                });
            }
        }
    }

    let status = if storage_failure {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    tracing::debug!(submitted, count, rejected = errors.len(), "Grade upload processed");
    let body = UploadResponse {
        success: errors.is_empty(),
        count,
        errors,
    };
    (status, Json(body)).into_response()
}

/// List grades by `teacherId` (faculty) or `studentId`.
pub async fn list_grades(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<GradeQuery>,
) -> ApiResult<GradesResponse> {
    let filter = query
        .filter()
        .ok_or_else(|| RecordError::Invalid("teacherId or studentId is required".into()))?;
    let grades = state.queries.grades(filter).await.map_err(RecordError::from)?;
    Ok(Json(GradesResponse {
        success: true,
        grades,
    }))
}

pub async fn delete_grade(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
) -> ApiResult<WriteResponse> {
    let applied = state.records.delete_grade(id).await?;
    Ok(Json(applied.into()))
}

pub async fn register_teacher(
    State(state): State<Arc<ServerState>>,
    Json(teacher): Json<NewTeacher>,
) -> ApiResult<WriteResponse> {
    let applied = state.records.register_teacher(teacher).await?;
    Ok(Json(applied.into()))
}

pub async fn update_teacher(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
    Json(update): Json<TeacherUpdate>,
) -> ApiResult<WriteResponse> {
    let applied = state.records.update_teacher(id, update).await?;
    Ok(Json(applied.into()))
}

pub async fn delete_teacher(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
) -> ApiResult<WriteResponse> {
    let applied = state.records.delete_teacher(id).await?;
    Ok(Json(applied.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ReaderError, WriterError};

    #[test]
    fn test_status_mapping() {
        let not_found = RecordError::NotFound {
            table: WatchedTable::Students,
            id: "S1".into(),
        };
        assert_eq!(status_for(&not_found), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&RecordError::Conflict("dup".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&RecordError::Invalid("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&RecordError::Storage(WriterError::ChannelClosed)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&RecordError::Read(ReaderError::Database(
                rusqlite::Error::InvalidQuery
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_grade_query_filter() {
        let both = GradeQuery {
            teacher_id: Some("F1".into()),
            student_id: Some("S1".into()),
        };
        assert_eq!(both.filter(), Some(GradeFilter::Faculty("F1".into())));

        let student = GradeQuery {
            teacher_id: Some("  ".into()),
            student_id: Some("S1".into()),
        };
        assert_eq!(student.filter(), Some(GradeFilter::Student("S1".into())));

        assert_eq!(GradeQuery::default().filter(), None);
    }
}
