// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! pnplink Gateway - device administration API and telemetry push channel
//!
//! # Endpoints
//!
//! - `GET  /api/connection-string` - configured hub name, or `"not configured"`
//! - `POST /api/connection-string` - `{"connectionstring": "..."}`
//! - `GET  /api/getDevices` - device list (`{}` when unconfigured)
//! - `GET  /api/getDeviceTwin?deviceId=` - device twin
//! - `GET  /api/getModelId?deviceId=` - model identifier
//! - `POST /api/updateDeviceTwin` - `{deviceId, componentName?, propertyName, propertyValue}`
//! - `POST /api/invokeCommand` - `{deviceId, componentName?, commandName, payload}`
//! - `GET  /health` - gateway status
//! - `GET  /ws` - push channel, one `{IotData, MessageDate, DeviceId}` text frame per record

pub mod config;
pub mod handlers;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod simulator;

use axum::Router;
use pnplink::{Registry, SharedConnection, TelemetryRelay};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::{ConfigError, GatewayConfig};
pub use handlers::ApiError;

/// Shared application state
pub struct AppState {
    pub(crate) connection: SharedConnection,
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) relay: TelemetryRelay,
    pub(crate) max_clients: usize,
    client_count: RwLock<usize>,
}

impl AppState {
    pub fn new(
        connection: SharedConnection,
        registry: Arc<dyn Registry>,
        relay: TelemetryRelay,
        max_clients: usize,
    ) -> Self {
        Self {
            connection,
            registry,
            relay,
            max_clients,
            client_count: RwLock::new(0),
        }
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }

    pub fn relay(&self) -> &TelemetryRelay {
        &self.relay
    }

    pub async fn client_count(&self) -> usize {
        *self.client_count.read().await
    }

    async fn can_accept_client(&self) -> bool {
        *self.client_count.read().await < self.max_clients
    }

    /// Reserve a push-channel slot; `false` when full.
    async fn try_add_client(&self) -> bool {
        let mut count = self.client_count.write().await;
        if *count >= self.max_clients {
            return false;
        }
        *count += 1;
        info!("Client connected. Total: {}", *count);
        true
    }

    async fn remove_client(&self) {
        let mut count = self.client_count.write().await;
        *count = count.saturating_sub(1);
        info!("Client disconnected. Total: {}", *count);
    }
}

/// Full application router with CORS and request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .merge(routes::push_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
