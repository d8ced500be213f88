use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::recovery::RecoveryError;
use crate::store::StoreError;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

/// Handler error. Client errors carry a user-facing message; `Internal` is
/// logged and answered with a generic one.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    TooManyRequests(String),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Conflict(message) => (StatusCode::CONFLICT, message),
            Self::TooManyRequests(message) => (StatusCode::TOO_MANY_REQUESTS, message),
            Self::Internal(err) => {
                error!("Request failed: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::not_found("Not found"),
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Database(err) => Self::Internal(err.into()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<RecoveryError> for ApiError {
    fn from(err: RecoveryError) -> Self {
        let message = err.to_string();
        match err {
            RecoveryError::UserNotFound | RecoveryError::SessionNotFound => Self::NotFound(message),
            RecoveryError::PinNotConfigured
            | RecoveryError::TwoFactorNotEnabled
            | RecoveryError::PasswordMismatch
            | RecoveryError::WeakPassword(_) => Self::BadRequest(message),
            RecoveryError::InvalidCode => Self::Unauthorized(message),
            RecoveryError::AccountInactive
            | RecoveryError::WrongStep { .. }
            | RecoveryError::NoPreviousStep(_) => Self::Conflict(message),
            RecoveryError::TooManyAttempts => Self::TooManyRequests(message),
            RecoveryError::Store(err) => err.into(),
            RecoveryError::Delivery(err) => Self::Internal(err.context("recovery email")),
            RecoveryError::Internal(err) => Self::Internal(err),
        }
    }
}
