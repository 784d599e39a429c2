// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route definitions for the REST API and the push channel.

use crate::handlers;
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// REST API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/connection-string",
            get(handlers::get_connection_string).post(handlers::set_connection_string),
        )
        .route("/api/getDevices", get(handlers::get_devices))
        .route("/api/getDeviceTwin", get(handlers::get_device_twin))
        .route("/api/getModelId", get(handlers::get_model_id))
        .route("/api/updateDeviceTwin", post(handlers::update_device_twin))
        .route("/api/invokeCommand", post(handlers::invoke_command))
        .route("/health", get(handlers::health))
}

/// Telemetry push channel
pub fn push_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(handlers::ws_handler))
}
