use crate::{
    api::{ApiError, AppState, ErrorBody},
    mac::MacAddress,
    store::{Device, DeviceType},
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

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterDevice {
    /// Any common MAC notation; normalized before storage.
    pub mac: String,
    pub owner: String,
    pub device_type: DeviceType,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeviceResponse {
    /// Colon-separated form, e.g. `00:14:22:01:23:45`.
    pub mac: String,
    pub owner: String,
    pub device_type: DeviceType,
    pub manufacturer: String,
    pub last_seen: DateTime<Utc>,
}

impl From<&Device> for DeviceResponse {
    fn from(device: &Device) -> Self {
        Self {
            mac: device.mac.formatted(),
            owner: device.owner.clone(),
            device_type: device.device_type,
            manufacturer: device.manufacturer.clone(),
            last_seen: device.last_seen,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VendorResponse {
    pub mac: String,
    pub normalized: String,
    pub vendor: String,
}

fn parse_mac(raw: &str) -> Result<MacAddress, ApiError> {
    MacAddress::parse(raw).map_err(|err| ApiError::bad_request(err.to_string()))
}

#[utoipa::path(
    post,
    path= "/devices",
    request_body = RegisterDevice,
    responses (
        (status = 201, description = "Device registered", body = DeviceResponse),
        (status = 200, description = "Existing device updated", body = DeviceResponse),
        (status = 400, description = "Invalid MAC address", body = ErrorBody),
        (status = 404, description = "Owner not found", body = ErrorBody),
    ),
    tag= "devices"
)]
#[instrument(skip(state, payload))]
pub async fn register_device(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<RegisterDevice>, JsonRejection>,
) -> Result<(StatusCode, Json<DeviceResponse>), ApiError> {
    let Json(request) = payload?;
    let mac = parse_mac(&request.mac)?;
    let owner = request.owner.trim();

    if state.users.find_by_username(owner).await?.is_none() {
        return Err(ApiError::not_found("Owner not found"));
    }

    let existed = state.devices.find(&mac).await?.is_some();
    let device = Device {
        manufacturer: state.vendors.lookup(&mac).await,
        mac,
        owner: owner.to_string(),
        device_type: request.device_type,
        last_seen: Utc::now(),
    };
    state.devices.upsert(&device).await?;
    info!(mac = %device.mac, owner = %device.owner, "device registered");

    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(DeviceResponse::from(&device))))
}

#[utoipa::path(
    get,
    path= "/devices/{mac}",
    params(("mac" = String, Path, description = "MAC address in any common notation")),
    responses (
        (status = 200, description = "Device found", body = DeviceResponse),
        (status = 400, description = "Invalid MAC address", body = ErrorBody),
        (status = 404, description = "Device not found", body = ErrorBody),
    ),
    tag= "devices"
)]
pub async fn get_device(
    state: Extension<Arc<AppState>>,
    Path(raw_mac): Path<String>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let mac = parse_mac(&raw_mac)?;
    let device = state
        .devices
        .find(&mac)
        .await?
        .ok_or_else(|| ApiError::not_found("Device not found"))?;
    Ok(Json(DeviceResponse::from(&device)))
}

#[utoipa::path(
    get,
    path= "/mac/{mac}/vendor",
    params(("mac" = String, Path, description = "MAC address in any common notation")),
    responses (
        (status = 200, description = "Vendor name, or Desconocido when unknown", body = VendorResponse),
        (status = 400, description = "Invalid MAC address", body = ErrorBody),
    ),
    tag= "devices"
)]
pub async fn mac_vendor(
    state: Extension<Arc<AppState>>,
    Path(raw_mac): Path<String>,
) -> Result<Json<VendorResponse>, ApiError> {
    let mac = parse_mac(&raw_mac)?;
    let vendor = state.vendors.lookup(&mac).await;
    Ok(Json(VendorResponse {
        mac: mac.formatted(),
        normalized: mac.as_str().to_string(),
        vendor,
    }))
}
