// HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::core::moderation::ModerationError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    // Auth errors
    Unauthorized,
    TokenInvalid,
    Forbidden,

    // Validation errors
    ValidationError(String),

    // Storage unreachable
    Unavailable(String),

    // Platform refused or timed out
    UpstreamError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required".to_string()),
            AppError::TokenInvalid => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Access denied".to_string()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unavailable(msg) => {
                tracing::error!("Moderation store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Moderation temporarily unavailable".to_string(),
                )
            }
            AppError::UpstreamError(msg) => {
                tracing::warn!("Platform action failed: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<ModerationError> for AppError {
    fn from(err: ModerationError) -> Self {
        match err {
            ModerationError::Config(msg) => AppError::ValidationError(msg),
            ModerationError::Storage(e) => AppError::Unavailable(e.to_string()),
            e @ (ModerationError::Platform(_) | ModerationError::Revocation(_)) => {
                AppError::UpstreamError(e.to_string())
            }
        }
    }
}

impl From<crate::core::moderation::StoreError> for AppError {
    fn from(err: crate::core::moderation::StoreError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AppError::TokenInvalid
    }
}
