use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use docchat_rag::RagError;

/// Error body for every non-streaming failure: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("session '{id}' not found"))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::SessionEnded => StatusCode::GONE,
            RagError::InvalidUpload(_) | RagError::Config(_) => StatusCode::BAD_REQUEST,
            RagError::Runtime(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
