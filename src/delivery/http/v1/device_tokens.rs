use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::delivery::http::v1::middleware::AuthenticatedUser;
use crate::domain::device_token::{DeviceToken, Platform};
use crate::usecase::error::UsecaseError;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterDeviceRequest {
    #[validate(length(min = 1, max = 4096))]
    pub token: String,
    pub platform: String,
}

#[derive(Serialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceToken>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[tracing::instrument(skip(state, payload), fields(user_id = %user.user_id))]
pub async fn register_device(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<RegisterDeviceRequest>,
) -> Result<impl IntoResponse, UsecaseError> {
    if let Err(validation_errors) = payload.validate() {
        tracing::warn!(user_id = %user.user_id, ?validation_errors, "validation failed");
        return Err(UsecaseError::Validation(format!("{:?}", validation_errors)));
    }

    let platform: Platform = payload
        .platform
        .parse()
        .map_err(|_| UsecaseError::Validation("platform must be ios, android or web".to_string()))?;

    let device = state
        .device_tokens_usecase
        .register(user.user_id, payload.token, platform)
        .await?;

    Ok((StatusCode::CREATED, Json(device)))
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    let devices = state.device_tokens_usecase.list(user.user_id).await?;
    let count = devices.len();
    Ok(Json(DeviceListResponse { devices, count }))
}

#[tracing::instrument(skip(state, token), fields(user_id = %user.user_id))]
pub async fn unregister_device(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, UsecaseError> {
    state.device_tokens_usecase.unregister(user.user_id, &token).await?;
    Ok(Json(MessageResponse { message: "device token removed".to_string() }))
}
