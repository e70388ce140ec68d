//! Device records and operator commands.
//!
//! - `GET  /api/devices`             — all records, most recently seen first
//! - `GET  /api/devices/{id}`        — one record (plus live-session flag)
//! - `POST /api/devices/{id}/server` — `{"ip", "port"}` → `IP,<ip>,<port>`
//! - `POST /api/devices/{id}/status` — `TS`
//! - `POST /api/devices/{id}/locate` — `CR`
//!
//! Commands are only written to devices with a live session; otherwise the
//! response is `404 DEVICE_NOT_CONNECTED` and nothing is queued.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{api_error, ApiError};
use crate::commands::{self, CommandError, OperatorCommand};
use crate::AppState;

pub async fn list_devices(State(state): State<AppState>) -> Json<Value> {
    let devices = state.records.list().await;
    Json(json!({ "devices": devices }))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state.records.get(&id).await.ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("Device '{id}' has never connected"),
            "DEVICE_NOT_FOUND",
        )
    })?;

    let mut body = json!(record);
    body["online"] = json!(state.registry.get(&id).await.is_some());
    Ok(Json(body))
}

#[derive(Deserialize)]
pub struct ChangeServerRequest {
    pub ip: String,
    pub port: u16,
}

pub async fn change_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ChangeServerRequest>,
) -> Result<Json<Value>, ApiError> {
    let command = commands::change_server(&payload.ip, payload.port).map_err(command_error)?;
    send(&state, &id, &command).await
}

pub async fn status_check(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    send(&state, &id, &OperatorCommand::StatusCheck).await
}

pub async fn locate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    send(&state, &id, &OperatorCommand::Locate).await
}

async fn send(
    state: &AppState,
    device_id: &str,
    command: &OperatorCommand,
) -> Result<Json<Value>, ApiError> {
    let frame = commands::send_command(&state.registry, &state.traffic, device_id, command)
        .await
        .map_err(command_error)?;
    Ok(Json(json!({
        "device_id": device_id,
        "frame": frame,
    })))
}

fn command_error(e: CommandError) -> ApiError {
    let status = match e {
        CommandError::NotConnected(_) => StatusCode::NOT_FOUND,
        CommandError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        CommandError::WriteFailed(_) => StatusCode::BAD_GATEWAY,
    };
    api_error(status, e.to_string(), e.code())
}
