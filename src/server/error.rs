use crate::blob::BlobError;
use crate::service::ServiceError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failure as seen by an HTTP client: a status and an `{"error": ...}` body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
    /// The conversation is gone but cleanup of its blobs failed.
    OrphanedBlobs(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::OrphanedBlobs(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::MissingFile
            | ServiceError::InvalidFile
            | ServiceError::InvalidChatId(_)
            | ServiceError::MissingFields(_) => ApiError::BadRequest(err.to_string()),
            ServiceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ServiceError::AlreadyExists(_) => ApiError::Conflict(err.to_string()),
            ServiceError::Disabled(_) => ApiError::Unavailable(err.to_string()),
            ServiceError::Blob(BlobError::InvalidKey(_)) => ApiError::BadRequest(err.to_string()),
            ServiceError::Store(_) | ServiceError::Blob(_) => {
                tracing::error!("[Server] Request failed: {}", err);
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::OrphanedBlobs(message) => json!({ "error": message, "chat_deleted": true }),
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::Conflict(message)
            | ApiError::Unavailable(message)
            | ApiError::Internal(message) => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}
