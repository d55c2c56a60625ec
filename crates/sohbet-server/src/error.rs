use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("File too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("File type not allowed: {0}")]
    UnsupportedFileType(String),

    #[error("Upload storage error: {0}")]
    Upload(String),

    #[error("Upstream service unavailable: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::UnsupportedFileType(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Upload(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store file".to_string())
            }
            ServerError::Upstream(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Numerology service unavailable".to_string(),
            ),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
