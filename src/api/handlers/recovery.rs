//! Recovery wizard endpoints. Each channel exposes the same three calls
//! (identify, verify, reset) over the shared wizard; `/recovery/back` works
//! for any of them.

use super::sync_status;
use crate::{
    api::{ApiError, AppState, ErrorBody},
    recovery::{Channel, StepView, mask_email},
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Identify {
    /// Username or institutional email.
    pub identifier: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct Verify {
    pub session_id: String,
    /// Emailed code, PIN or TOTP code depending on the channel.
    #[serde(alias = "pin")]
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct Reset {
    pub session_id: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Back {
    pub session_id: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ResetResult {
    #[serde(flatten)]
    pub view: StepView,
    pub directory_synced: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DualStatus {
    pub username: String,
    /// Masked address recovery codes are sent to.
    pub recovery_email: String,
    pub email: bool,
    pub pin: bool,
    pub two_factor: bool,
}

async fn identify(
    state: &AppState,
    channel: Channel,
    payload: Result<Json<Identify>, JsonRejection>,
) -> Result<Json<StepView>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.wizard.identify(channel, &request.identifier).await?))
}

async fn verify(
    state: &AppState,
    channel: Channel,
    payload: Result<Json<Verify>, JsonRejection>,
) -> Result<Json<StepView>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(
        state
            .wizard
            .verify(channel, &request.session_id, &request.code)
            .await?,
    ))
}

async fn reset(
    state: &AppState,
    channel: Channel,
    payload: Result<Json<Reset>, JsonRejection>,
) -> Result<(StatusCode, Json<ResetResult>), ApiError> {
    let Json(request) = payload?;
    let outcome = state
        .wizard
        .reset(
            channel,
            &request.session_id,
            &request.new_password,
            &request.confirm_password,
        )
        .await?;

    Ok((
        sync_status(outcome.directory_synced),
        Json(ResetResult {
            view: outcome.view,
            directory_synced: outcome.directory_synced,
        }),
    ))
}

#[utoipa::path(
    post,
    path= "/email/forgot-password",
    request_body = Identify,
    responses (
        (status = 200, description = "Code sent; session waits for verify", body = StepView),
        (status = 404, description = "User not found", body = ErrorBody),
        (status = 409, description = "Account not activated", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn email_forgot_password(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Identify>, JsonRejection>,
) -> Result<Json<StepView>, ApiError> {
    identify(&state, Channel::Email, payload).await
}

#[utoipa::path(
    post,
    path= "/email/verify-code",
    request_body = Verify,
    responses (
        (status = 200, description = "Code accepted; session moves to reset", body = StepView),
        (status = 401, description = "Invalid code", body = ErrorBody),
        (status = 404, description = "Session not found or expired", body = ErrorBody),
        (status = 409, description = "Session is not at the verify step", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn email_verify_code(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Verify>, JsonRejection>,
) -> Result<Json<StepView>, ApiError> {
    verify(&state, Channel::Email, payload).await
}

#[utoipa::path(
    post,
    path= "/email/reset-password",
    request_body = Reset,
    responses (
        (status = 200, description = "Password reset", body = ResetResult),
        (status = 202, description = "Password reset; directory update pending", body = ResetResult),
        (status = 400, description = "Invalid new password", body = ErrorBody),
        (status = 404, description = "Session not found or expired", body = ErrorBody),
        (status = 409, description = "Session has not been verified", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn email_reset_password(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Reset>, JsonRejection>,
) -> Result<(StatusCode, Json<ResetResult>), ApiError> {
    reset(&state, Channel::Email, payload).await
}

#[utoipa::path(
    post,
    path= "/pin/check",
    request_body = Identify,
    responses (
        (status = 200, description = "PIN configured; session waits for verify", body = StepView),
        (status = 400, description = "PIN not configured", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn pin_check(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Identify>, JsonRejection>,
) -> Result<Json<StepView>, ApiError> {
    identify(&state, Channel::Pin, payload).await
}

#[utoipa::path(
    post,
    path= "/pin/verify",
    request_body = Verify,
    responses (
        (status = 200, description = "PIN accepted; session moves to reset", body = StepView),
        (status = 401, description = "Invalid PIN", body = ErrorBody),
        (status = 404, description = "Session not found or expired", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn pin_verify(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Verify>, JsonRejection>,
) -> Result<Json<StepView>, ApiError> {
    verify(&state, Channel::Pin, payload).await
}

#[utoipa::path(
    post,
    path= "/pin/reset-password",
    request_body = Reset,
    responses (
        (status = 200, description = "Password reset", body = ResetResult),
        (status = 202, description = "Password reset; directory update pending", body = ResetResult),
        (status = 400, description = "Invalid new password", body = ErrorBody),
        (status = 409, description = "Session has not been verified", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn pin_reset_password(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Reset>, JsonRejection>,
) -> Result<(StatusCode, Json<ResetResult>), ApiError> {
    reset(&state, Channel::Pin, payload).await
}

#[utoipa::path(
    post,
    path= "/2fa/recovery/start",
    request_body = Identify,
    responses (
        (status = 200, description = "2FA enabled; session waits for verify", body = StepView),
        (status = 400, description = "2FA not enabled", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn two_factor_start(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Identify>, JsonRejection>,
) -> Result<Json<StepView>, ApiError> {
    identify(&state, Channel::Totp, payload).await
}

#[utoipa::path(
    post,
    path= "/2fa/verify",
    request_body = Verify,
    responses (
        (status = 200, description = "Code accepted; session moves to reset", body = StepView),
        (status = 401, description = "Invalid code", body = ErrorBody),
        (status = 404, description = "Session not found or expired", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn two_factor_verify(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Verify>, JsonRejection>,
) -> Result<Json<StepView>, ApiError> {
    verify(&state, Channel::Totp, payload).await
}

#[utoipa::path(
    post,
    path= "/2fa/reset-password",
    request_body = Reset,
    responses (
        (status = 200, description = "Password reset", body = ResetResult),
        (status = 202, description = "Password reset; directory update pending", body = ResetResult),
        (status = 400, description = "Invalid new password", body = ErrorBody),
        (status = 409, description = "Session has not been verified", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn two_factor_reset_password(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Reset>, JsonRejection>,
) -> Result<(StatusCode, Json<ResetResult>), ApiError> {
    reset(&state, Channel::Totp, payload).await
}

#[utoipa::path(
    post,
    path= "/recovery/back",
    request_body = Back,
    responses (
        (status = 200, description = "Session moved to the previous step", body = StepView),
        (status = 404, description = "Session not found or expired", body = ErrorBody),
        (status = 409, description = "No previous step", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn back(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Back>, JsonRejection>,
) -> Result<Json<StepView>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.wizard.back(&request.session_id).await?))
}

#[utoipa::path(
    post,
    path= "/verify/dual-status",
    request_body = Identify,
    responses (
        (status = 200, description = "Recovery channels available to the user", body = DualStatus),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    tag= "recovery"
)]
#[instrument(skip(state, payload))]
pub async fn dual_status(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Identify>, JsonRejection>,
) -> Result<Json<DualStatus>, ApiError> {
    let Json(request) = payload?;
    let user = state
        .users
        .find_by_identifier(request.identifier.trim())
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(DualStatus {
        recovery_email: mask_email(user.recovery_email()),
        email: true,
        pin: user.pin_hash.is_some(),
        two_factor: user.two_factor_enabled,
        username: user.username,
    }))
}
