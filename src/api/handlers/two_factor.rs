//! TOTP enrollment. The secret is stored as soon as setup starts and only
//! becomes active once a code generated from it is confirmed.

use super::authenticate;
use crate::api::{ApiError, AppState, ErrorBody};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct TwoFactorCredentials {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct TwoFactorConfirm {
    pub username: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorEnrollment {
    /// Base32 secret for manual entry.
    pub secret: String,
    pub otpauth_url: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorStatus {
    pub two_factor_enabled: bool,
}

#[utoipa::path(
    post,
    path= "/2fa/setup",
    request_body = TwoFactorCredentials,
    responses (
        (status = 200, description = "Enrollment started", body = TwoFactorEnrollment),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 409, description = "2FA already enabled", body = ErrorBody),
    ),
    tag= "2fa"
)]
#[instrument(skip(state, payload))]
pub async fn setup(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<TwoFactorCredentials>, JsonRejection>,
) -> Result<Json<TwoFactorEnrollment>, ApiError> {
    let Json(request) = payload?;
    let user = authenticate(state.users.as_ref(), &request.username, &request.password).await?;

    if user.two_factor_enabled {
        return Err(ApiError::conflict("2FA already enabled"));
    }

    let enrollment = state
        .totp
        .enroll(&user.username)
        .map_err(ApiError::Internal)?;
    state
        .users
        .set_two_factor(&user.username, Some(&enrollment.secret), false)
        .await?;
    info!(username = %user.username, "2FA enrollment started");

    Ok(Json(TwoFactorEnrollment {
        secret: enrollment.secret,
        otpauth_url: enrollment.otpauth_url,
    }))
}

#[utoipa::path(
    post,
    path= "/2fa/confirm",
    request_body = TwoFactorConfirm,
    responses (
        (status = 200, description = "2FA enabled", body = TwoFactorStatus),
        (status = 400, description = "Enrollment not started", body = ErrorBody),
        (status = 401, description = "Invalid code", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
        (status = 409, description = "2FA already enabled", body = ErrorBody),
    ),
    tag= "2fa"
)]
#[instrument(skip(state, payload))]
pub async fn confirm(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<TwoFactorConfirm>, JsonRejection>,
) -> Result<Json<TwoFactorStatus>, ApiError> {
    let Json(request) = payload?;
    let user = state
        .users
        .find_by_username(request.username.trim())
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if user.two_factor_enabled {
        return Err(ApiError::conflict("2FA already enabled"));
    }
    let secret = user
        .two_factor_secret
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("2FA setup not started"))?;

    let valid = state
        .totp
        .verify(secret, &user.username, &request.code)
        .map_err(ApiError::Internal)?;
    if !valid {
        return Err(ApiError::unauthorized("Invalid code"));
    }

    state
        .users
        .set_two_factor(&user.username, Some(secret), true)
        .await?;
    info!(username = %user.username, "2FA enabled");

    Ok(Json(TwoFactorStatus {
        two_factor_enabled: true,
    }))
}

#[utoipa::path(
    post,
    path= "/2fa/disable",
    request_body = TwoFactorCredentials,
    responses (
        (status = 200, description = "2FA disabled and secret removed", body = TwoFactorStatus),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    ),
    tag= "2fa"
)]
#[instrument(skip(state, payload))]
pub async fn disable(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<TwoFactorCredentials>, JsonRejection>,
) -> Result<Json<TwoFactorStatus>, ApiError> {
    let Json(request) = payload?;
    let user = authenticate(state.users.as_ref(), &request.username, &request.password).await?;

    state.users.set_two_factor(&user.username, None, false).await?;
    info!(username = %user.username, "2FA disabled");

    Ok(Json(TwoFactorStatus {
        two_factor_enabled: false,
    }))
}
