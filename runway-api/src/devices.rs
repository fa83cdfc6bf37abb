use axum::{extract::State, http::StatusCode, routing::post, Extension, Json, Router};
use runway_core::{DeviceType, PushDevice};
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub token: String,
    #[serde(default, alias = "device_type")]
    pub device_type: DeviceType,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/push-devices", post(register_device))
}

/// Registers a push token for the calling account.
async fn register_device(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterDeviceRequest>,
) -> Result<(StatusCode, Json<PushDevice>), AppError> {
    let token = req.token.trim();
    if token.is_empty() {
        return Err(AppError::Validation("token is required".to_string()));
    }

    let device = state
        .devices
        .register_device(claims.sub, token, req.device_type)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(user_id = %claims.sub, device_id = %device.id, "Push device registered");
    Ok((StatusCode::CREATED, Json(device)))
}
