//! 领域错误分类与 HTTP 错误响应转换。

use axum::Json;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::sanitize::RejectedName;

/// Classified failures of the upload, retrieval, archive and deletion paths.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("File with this name already exists: {0}")]
    DuplicateName(String),
    #[error("Database error: {0}")]
    MetadataFailure(String),
    #[error("Failed to save file: {0}")]
    BlobWriteFailure(String),
    #[error("File record not found in database: {0}")]
    RecordNotFound(String),
    #[error("File not found on server: {0}")]
    BlobNotFound(String),
    #[error(transparent)]
    RejectedName(#[from] RejectedName),
    #[error("Operation timed out")]
    Timeout,
    #[error("Partial deletion occurred")]
    PartialDeletion { details: Vec<String> },
    #[error("No files found for group {0}")]
    GroupNotFound(String),
    #[error("zip creation failed: {0}")]
    ArchiveFailure(String),
}

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
    Partial { error: String, details: Vec<String> },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => error_body(StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => error_body(StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Partial { error, details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error, "details": details })),
            )
                .into_response(),
        }
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

// Extractor rejections carry axum's plain-text message; re-wrap it as JSON.
impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<FileError> for ApiError {
    fn from(error: FileError) -> Self {
        let message = error.to_string();
        match error {
            FileError::InvalidRequest(_) | FileError::RejectedName(_) => {
                ApiError::BadRequest(message)
            }
            FileError::DuplicateName(_) => ApiError::Conflict(message),
            FileError::RecordNotFound(_)
            | FileError::BlobNotFound(_)
            | FileError::GroupNotFound(_) => ApiError::NotFound(message),
            FileError::MetadataFailure(_)
            | FileError::BlobWriteFailure(_)
            | FileError::ArchiveFailure(_)
            | FileError::Timeout => ApiError::Internal(message),
            FileError::PartialDeletion { details } => ApiError::Partial {
                error: message,
                details,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn duplicate_name_maps_to_conflict_with_json_error() {
        let response = ApiError::from(FileError::DuplicateName("a.txt".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "File with this name already exists: a.txt");
    }

    #[tokio::test]
    async fn timeout_maps_to_internal_error() {
        let response = ApiError::from(FileError::Timeout).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Operation timed out");
    }

    #[tokio::test]
    async fn partial_deletion_lists_details() {
        let response = ApiError::from(FileError::PartialDeletion {
            details: vec!["File deletion error: denied".into()],
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Partial deletion occurred");
        assert_eq!(body["details"][0], "File deletion error: denied");
    }
}
