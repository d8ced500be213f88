//! Login, activation, password change and profile display.

use super::{
    authenticate, check_new_password, devices::DeviceResponse, directory_synced, sync_status,
    valid_email,
};
use crate::{
    api::{ApiError, AppState, ErrorBody},
    store::{Affiliation, User, UserStatus},
};
use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct Login {
    /// Username or institutional email.
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct Activate {
    pub username: String,
    pub institutional_email: String,
    pub backup_email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct ChangePassword {
    pub username: String,
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Profile {
    pub username: String,
    pub display_name: String,
    pub institutional_email: String,
    pub backup_email: Option<String>,
    pub affiliation: Affiliation,
    pub status: UserStatus,
    pub two_factor_enabled: bool,
    pub pin_configured: bool,
    pub last_password_update: Option<DateTime<Utc>>,
    pub devices: Vec<DeviceResponse>,
}

impl Profile {
    fn new(user: User, devices: Vec<DeviceResponse>) -> Self {
        Self {
            pin_configured: user.pin_hash.is_some(),
            username: user.username,
            display_name: user.display_name,
            institutional_email: user.institutional_email,
            backup_email: user.backup_email,
            affiliation: user.affiliation,
            status: user.status,
            two_factor_enabled: user.two_factor_enabled,
            last_password_update: user.last_password_update,
            devices,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ActivationResult {
    pub username: String,
    pub status: UserStatus,
    pub directory_synced: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordChangeResult {
    pub directory_synced: bool,
}

async fn load_profile(state: &AppState, user: User) -> Result<Profile, ApiError> {
    let devices = state
        .devices
        .list_for_owner(&user.username)
        .await?
        .iter()
        .map(DeviceResponse::from)
        .collect();
    Ok(Profile::new(user, devices))
}

#[utoipa::path(
    post,
    path= "/login",
    request_body = Login,
    responses (
        (status = 200, description = "Credentials accepted", body = Profile),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 409, description = "Account not activated", body = ErrorBody),
    ),
    tag= "account"
)]
#[instrument(skip(state, payload))]
pub async fn login(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Login>, JsonRejection>,
) -> Result<Json<Profile>, ApiError> {
    let Json(request) = payload?;
    let user = authenticate(state.users.as_ref(), &request.username, &request.password).await?;

    if user.status != UserStatus::Active {
        return Err(ApiError::conflict("Account not activated"));
    }

    info!(username = %user.username, "login");
    Ok(Json(load_profile(&state, user).await?))
}

#[utoipa::path(
    post,
    path= "/activate",
    request_body = Activate,
    responses (
        (status = 200, description = "Account activated", body = ActivationResult),
        (status = 202, description = "Account activated; directory update pending", body = ActivationResult),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Institutional email does not match", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
        (status = 409, description = "Account already activated", body = ErrorBody),
    ),
    tag= "account"
)]
#[instrument(skip(state, payload))]
pub async fn activate(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<Activate>, JsonRejection>,
) -> Result<(StatusCode, Json<ActivationResult>), ApiError> {
    let Json(request) = payload?;
    let backup_email = request.backup_email.trim().to_lowercase();

    if !valid_email(&backup_email) {
        return Err(ApiError::bad_request("Invalid backup email"));
    }
    check_new_password(&request.password, &request.confirm_password)?;

    let user = state
        .users
        .find_by_username(request.username.trim())
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if user.institutional_email != request.institutional_email.trim().to_lowercase() {
        return Err(ApiError::unauthorized("Institutional email does not match"));
    }
    if user.status == UserStatus::Active {
        return Err(ApiError::conflict("Account already activated"));
    }
    if backup_email == user.institutional_email {
        return Err(ApiError::bad_request(
            "Backup email must differ from the institutional email",
        ));
    }

    let synced = directory_synced(
        state
            .sync
            .activate_account(&user, &backup_email, &request.password)
            .await,
    )?;
    info!(username = %user.username, directory_synced = synced, "account activated");

    Ok((
        sync_status(synced),
        Json(ActivationResult {
            username: user.username,
            status: UserStatus::Active,
            directory_synced: synced,
        }),
    ))
}

#[utoipa::path(
    post,
    path= "/password/change",
    request_body = ChangePassword,
    responses (
        (status = 200, description = "Password changed", body = PasswordChangeResult),
        (status = 202, description = "Password changed; directory update pending", body = PasswordChangeResult),
        (status = 400, description = "Invalid new password", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    ),
    tag= "account"
)]
#[instrument(skip(state, payload))]
pub async fn change_password(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<ChangePassword>, JsonRejection>,
) -> Result<(StatusCode, Json<PasswordChangeResult>), ApiError> {
    let Json(request) = payload?;
    let user = authenticate(
        state.users.as_ref(),
        &request.username,
        &request.current_password,
    )
    .await?;

    check_new_password(&request.new_password, &request.confirm_password)?;
    if request.new_password == request.current_password {
        return Err(ApiError::bad_request(
            "New password must differ from the current one",
        ));
    }

    let synced = directory_synced(state.sync.sync_password(&user, &request.new_password).await)?;
    info!(username = %user.username, directory_synced = synced, "password changed");

    Ok((
        sync_status(synced),
        Json(PasswordChangeResult {
            directory_synced: synced,
        }),
    ))
}

#[utoipa::path(
    get,
    path= "/profile/{username}",
    params(("username" = String, Path, description = "Account username")),
    responses (
        (status = 200, description = "Profile with registered devices", body = Profile),
        (status = 404, description = "User not found", body = ErrorBody),
    ),
    tag= "account"
)]
pub async fn profile(
    state: Extension<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<Profile>, ApiError> {
    let user = state
        .users
        .find_by_username(username.trim())
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(load_profile(&state, user).await?))
}
