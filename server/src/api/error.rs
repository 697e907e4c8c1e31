use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::commands::CommandError;

/// Structured JSON error body returned by all API error responses.
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Unified application error type.
///
/// Implements [`IntoResponse`] so handlers can return `Result<T, AppError>`
/// and axum will convert errors into `{success: false, error, details?}`
/// bodies with the appropriate HTTP status code.
pub enum AppError {
    /// Input validation failed (400).
    Validation(String),
    /// Resource not found (404).
    NotFound(String),
    /// Precondition failed: device offline / session not connected (409).
    Conflict(String),
    /// Database query failed (500).
    Database(sqlx::Error),
    /// Internal server error (500).
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            AppError::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error".to_string(),
                Some(e.to_string()),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
                Some(msg),
            ),
        };
        (
            status,
            Json(ApiErrorBody {
                success: false,
                error,
                details,
            }),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("not found".to_string()),
            other => AppError::Database(other),
        }
    }
}

impl From<CommandError> for AppError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::DeviceNotFound => AppError::NotFound(e.message()),
            CommandError::DeviceOffline | CommandError::NotConnected => {
                AppError::Conflict(e.message())
            }
            CommandError::Internal(detail) => AppError::Internal(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1_000_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_validation_response() {
        let response = AppError::Validation("deviceId is required".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "deviceId is required");
    }

    #[tokio::test]
    async fn test_not_found_response() {
        let response = AppError::NotFound("device not found".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["error"], "device not found");
    }

    #[tokio::test]
    async fn test_conflict_response() {
        let response = AppError::Conflict("not connected".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let json = body_json(response).await;
        assert_eq!(json["error"], "not connected");
    }

    #[tokio::test]
    async fn test_internal_response_carries_details() {
        let response = AppError::Internal("something broke".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "internal error");
        assert_eq!(json["details"], "something broke");
    }

    #[tokio::test]
    async fn test_command_error_status_mapping() {
        let not_found: AppError = CommandError::DeviceNotFound.into();
        assert_eq!(
            not_found.into_response().status(),
            StatusCode::NOT_FOUND
        );

        let offline: AppError = CommandError::DeviceOffline.into();
        assert_eq!(offline.into_response().status(), StatusCode::CONFLICT);

        let not_connected: AppError = CommandError::NotConnected.into();
        let response = not_connected.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"], "not connected");

        let internal: AppError = CommandError::Internal("boom".to_string()).into();
        assert_eq!(
            internal.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
