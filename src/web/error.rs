use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::db::services::ServiceError;
use crate::monitoring::error::{ConfigValidationError, SchedulerError};
use crate::monitoring::store::StoreError;
use crate::notifications::service::NotificationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Token expired")]
    TokenExpired,
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
            }
            AppError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired".to_string()),
            AppError::DatabaseError(msg) => {
                error!(error = %msg, "Request failed on a storage error.");
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::DeliveryFailed(msg) => (StatusCode::BAD_GATEWAY, msg),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON serialization/deserialization error: {err}"))
    }
}

impl From<ConfigValidationError> for AppError {
    fn from(err: ConfigValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => e.into(),
            ServiceError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            ServiceError::Store(e) => e.into(),
            ServiceError::Export(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Store(e) => e.into(),
            NotificationError::Sender(e) => AppError::DeliveryFailed(e.to_string()),
            NotificationError::UnsupportedChannel(_) => AppError::InvalidInput(err.to_string()),
            NotificationError::ChannelDisabled(_) | NotificationError::IncidentNotOpen(_) => {
                AppError::Conflict(err.to_string())
            }
        }
    }
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}
