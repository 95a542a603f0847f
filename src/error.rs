//! HTTP-surface error type.
//!
//! WebSocket frame-level failures never cross a session boundary (see §7 of
//! the design doc) and are handled inline by the frame dispatch match arms;
//! this type only covers the small HTTP surface in `http.rs`.

use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Robot not found")]
    RobotNotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::RobotNotFound => (StatusCode::NOT_FOUND, "Robot not found"),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
