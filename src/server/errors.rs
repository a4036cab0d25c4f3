use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::desk::DeskError;

/// Errors surfaced by the REST handlers as `{ "error", "message" }` bodies.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
    Upstream(DeskError),
}

impl From<DeskError> for ApiError {
    fn from(err: DeskError) -> Self {
        match err {
            DeskError::Invalid(msg) => ApiError::BadRequest(msg),
            other => ApiError::Upstream(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Internal(msg) => {
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
            ApiError::Upstream(err) => {
                let summary = err.summary();
                (
                    StatusCode::BAD_GATEWAY,
                    axum::Json(json!({
                        "error": "upstream_error",
                        "message": summary.message,
                        "rawDetail": summary.raw_detail,
                    })),
                )
                    .into_response()
            }
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
