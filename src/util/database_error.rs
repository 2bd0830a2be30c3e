use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use thiserror::Error;

/// Wrapper that turns a sqlx failure into a plain 500 for the dashboard.
#[derive(Debug, Error)]
#[error("database error: {0}")]
pub struct DatabaseError(#[from] pub sqlx::Error);

impl IntoResponse for DatabaseError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Database Error: {:?}", self.0)).into_response()
    }
}
