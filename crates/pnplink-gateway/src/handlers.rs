// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers for the REST API and the push channel.

use crate::protocol::{
    ConnectionStringRequest, DeviceQuery, InvokeCommandRequest, UpdateTwinRequest,
};
use crate::session::PushSession;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pnplink::codec;
use pnplink::config::ConnectionStringError;
use pnplink::{ConnectionString, DesiredPatch, DeviceTwin, MethodResult, RegistryError};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reply when no connection string is set.
pub const NOT_CONFIGURED: &str = "not configured";

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: 400,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let code = match &err {
            RegistryError::InvalidPatch(_) => 400,
            RegistryError::Unauthorized(_) => 401,
            RegistryError::DeviceNotFound(_) | RegistryError::MethodNotFound { .. } => 404,
            RegistryError::DeviceNotConnected(_) | RegistryError::NotConfigured => 503,
            RegistryError::Timeout(_) => 504,
        };
        Self {
            error: err.to_string(),
            code,
        }
    }
}

impl From<ConnectionStringError> for ApiError {
    fn from(err: ConnectionStringError) -> Self {
        Self::bad_request(format!("Invalid connection string: {}", err))
    }
}

/// Connection snapshot for this request.
fn connection(state: &AppState) -> Result<ConnectionString, ApiError> {
    let snapshot = state.connection.snapshot();
    match (*snapshot).as_ref() {
        Some(cs) => Ok(cs.clone()),
        None => Err(RegistryError::NotConfigured.into()),
    }
}

fn require_device_id(device_id: &str) -> Result<(), ApiError> {
    if device_id.trim().is_empty() {
        Err(ApiError::bad_request("deviceId is required"))
    } else {
        Ok(())
    }
}

fn hub_label(cs: Option<&ConnectionString>) -> Json<String> {
    Json(
        cs.map(|cs| cs.hub_name().to_string())
            .unwrap_or_else(|| NOT_CONFIGURED.to_string()),
    )
}

/// GET /api/connection-string - configured hub name
pub async fn get_connection_string(State(state): State<Arc<AppState>>) -> Json<String> {
    let snapshot = state.connection.snapshot();
    hub_label((*snapshot).as_ref())
}

/// POST /api/connection-string - replace (or clear) the connection string
pub async fn set_connection_string(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConnectionStringRequest>,
) -> Result<Json<String>, ApiError> {
    let next = match body.connectionstring.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<ConnectionString>()?),
    };

    match &next {
        Some(cs) => info!(hub = cs.hub_name(), "Connection string updated"),
        None => info!("Connection string cleared"),
    }
    let label = hub_label(next.as_ref());
    state.connection.replace(next);
    Ok(label)
}

/// GET /api/getDevices
pub async fn get_devices(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let snapshot = state.connection.snapshot();
    let Some(cs) = (*snapshot).as_ref() else {
        return Ok(Json(json!({})).into_response());
    };
    let devices = state.registry.list_devices(cs).await?;
    debug!(count = devices.len(), "Listed devices");
    Ok(Json(devices).into_response())
}

/// GET /api/getDeviceTwin?deviceId=
pub async fn get_device_twin(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<DeviceTwin>, ApiError> {
    require_device_id(&query.device_id)?;
    let cs = connection(&state)?;
    let twin = state.registry.get_twin(&cs, &query.device_id).await?;
    Ok(Json(twin))
}

/// GET /api/getModelId?deviceId=
pub async fn get_model_id(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<Option<String>>, ApiError> {
    require_device_id(&query.device_id)?;
    let cs = connection(&state)?;
    let twin = state.registry.get_twin(&cs, &query.device_id).await?;
    Ok(Json(twin.model_id))
}

/// POST /api/updateDeviceTwin
pub async fn update_device_twin(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateTwinRequest>,
) -> Result<Json<DeviceTwin>, ApiError> {
    require_device_id(&req.device_id)?;
    if req.property_name.is_empty() {
        return Err(ApiError::bad_request("propertyName is required"));
    }
    let cs = connection(&state)?;

    let patch = match req.component_name.as_deref().filter(|c| !c.is_empty()) {
        Some(component) => {
            DesiredPatch::component_property(component, &req.property_name, req.property_value)
        }
        None => DesiredPatch::property(&req.property_name, req.property_value),
    };
    let twin = state.registry.patch_twin(&cs, &req.device_id, patch).await?;
    info!(device_id = %req.device_id, property = %req.property_name, "Twin updated");
    Ok(Json(twin))
}

/// POST /api/invokeCommand
pub async fn invoke_command(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvokeCommandRequest>,
) -> Result<Json<MethodResult>, ApiError> {
    require_device_id(&req.device_id)?;
    if req.command_name.is_empty() {
        return Err(ApiError::bad_request("commandName is required"));
    }
    let cs = connection(&state)?;

    let method = match req.component_name.as_deref().filter(|c| !c.is_empty()) {
        Some(component) => codec::join_command_name(component, &req.command_name),
        None => req.command_name.clone(),
    };
    info!(device_id = %req.device_id, method = %method, "Running command");
    let result = state
        .registry
        .invoke_method(&cs, &req.device_id, &method, req.payload)
        .await?;
    Ok(Json(result))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "configured": state.connection.is_configured(),
        "clients": state.client_count().await,
        "max_clients": state.max_clients,
        "relay": state.relay.stats(),
    }))
}

/// GET /ws - telemetry push channel
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if !state.can_accept_client().await {
        warn!("Connection rejected: max clients reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    // Slots are taken only once the upgrade went through.
    if !state.try_add_client().await {
        warn!("Connection closed: max clients reached");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let session = PushSession::new(state.relay.clone());
    session.run(socket).await;
    state.remove_client().await;
}
