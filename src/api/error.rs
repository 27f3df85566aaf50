use crate::application::circulation::CirculationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::types::ErrorResponse;

/// API層のエラー型
///
/// アプリケーション層のエラーをラップし、HTTPレスポンスへのマッピングを提供する。
#[derive(Debug)]
pub enum ApiError {
    Circulation(CirculationError),
    BadRequest(String),
}

impl From<CirculationError> for ApiError {
    fn from(err: CirculationError) -> Self {
        ApiError::Circulation(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            // 400 Bad Request - リクエストの形式が不正
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),

            ApiError::Circulation(err @ CirculationError::InvalidReturnDate { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_RETURN_DATE", err.to_string())
            }

            // 404 Not Found - リクエストされたリソースが存在しない
            ApiError::Circulation(err @ CirculationError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }

            // 422 Unprocessable Entity - 会員の状態によるビジネスルール違反
            ApiError::Circulation(err @ CirculationError::OverdueLockout) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "OVERDUE_LOCKOUT",
                err.to_string(),
            ),

            // 409 Conflict - 対象の現在の状態と矛盾する
            ApiError::Circulation(err @ CirculationError::CopyUnavailable) => {
                (StatusCode::CONFLICT, "COPY_UNAVAILABLE", err.to_string())
            }
            ApiError::Circulation(err @ CirculationError::AlreadyReturned) => {
                (StatusCode::CONFLICT, "ALREADY_RETURNED", err.to_string())
            }

            // 503 Service Unavailable - 再試行を使い切った競合
            ApiError::Circulation(err @ CirculationError::StorageConflict(_)) => {
                tracing::warn!("Storage conflict after retries: {}", err);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORAGE_CONFLICT",
                    "Too many concurrent updates, please retry".to_string(),
                )
            }

            // 500 Internal Server Error - システム障害
            // 内部エラーの詳細はログに記録し、クライアントには一般的なメッセージのみを返す
            ApiError::Circulation(err) => {
                tracing::error!(error = ?err, "Internal error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse::new(error_type, message));
        (status, body).into_response()
    }
}
