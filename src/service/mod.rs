//! HTTP and WebSocket handlers for Gradecast.

pub mod records;
pub mod ws;

use axum::{http::StatusCode, response::IntoResponse, routing::get, routing::post, Router};
use std::sync::Arc;

use crate::server::ServerState;

/// Build the application router.
///
/// `/` also upgrades to WebSocket so dashboards pointed at the bare host
/// keep working.
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/api/students", post(records::register_student))
        .route(
            "/api/students/:student_id",
            get(records::get_student)
                .put(records::update_student)
                .delete(records::delete_student),
        )
        .route("/api/grades", get(records::list_grades).post(records::upload_grades))
        .route("/api/grades/:id", axum::routing::delete(records::delete_grade))
        .route("/api/teachers", post(records::register_teacher))
        .route(
            "/api/teachers/:id",
            axum::routing::put(records::update_teacher).delete(records::delete_teacher),
        )
        .with_state(state)
}

/// Handle GET /health - Basic health check.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Handle GET /ready - Readiness check.
async fn ready_handler() -> impl IntoResponse {
    (StatusCode::OK, "READY")
}
