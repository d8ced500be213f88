use super::authenticate;
use crate::{
    api::{ApiError, AppState, ErrorBody},
    password,
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct PinSetup {
    pub username: String,
    pub password: String,
    /// 4 to 8 digits.
    pub pin: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PinStatus {
    pub pin_configured: bool,
}

#[utoipa::path(
    post,
    path= "/pin/setup",
    request_body = PinSetup,
    responses (
        (status = 200, description = "Recovery PIN stored", body = PinStatus),
        (status = 400, description = "PIN must be 4 to 8 digits", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    ),
    tag= "pin"
)]
#[instrument(skip(state, payload))]
pub async fn setup(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<PinSetup>, JsonRejection>,
) -> Result<Json<PinStatus>, ApiError> {
    let Json(request) = payload?;
    let user = authenticate(state.users.as_ref(), &request.username, &request.password).await?;

    let pin = request.pin.trim();
    if !password::valid_pin(pin) {
        return Err(ApiError::bad_request("PIN must be 4 to 8 digits"));
    }

    let pin_hash = password::hash_secret(pin).map_err(ApiError::Internal)?;
    state.users.set_pin(&user.username, &pin_hash).await?;
    info!(username = %user.username, "recovery PIN configured");

    Ok(Json(PinStatus {
        pin_configured: true,
    }))
}
