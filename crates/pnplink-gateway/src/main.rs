// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! pnplink Gateway - HTTP API and WebSocket telemetry push
//!
//! # Usage
//!
//! ```bash
//! # Start on default port 3000
//! pnplink-gateway
//!
//! # Two simulated thermostats, connection string from the environment
//! IOTHUB_CONNECTION_STRING="HostName=pnplink.local;SharedAccessKeyName=owner;SharedAccessKey=..." \
//!     pnplink-gateway --simulate 2
//!
//! # Using config file
//! pnplink-gateway --config gateway.toml
//! ```

use clap::Parser;
use pnplink::memory::MemoryHub;
use pnplink::{IngestionLog, Registry, SharedConnection, TelemetryRelay};
use pnplink_gateway::{build_router, simulator, AppState, ConfigError, GatewayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// pnplink Gateway
#[derive(Parser, Debug)]
#[command(name = "pnplink-gateway")]
#[command(about = "Device administration API and WebSocket telemetry push")]
#[command(version)]
struct Args {
    /// HTTP server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Maximum concurrent WebSocket connections
    #[arg(long)]
    max_clients: Option<usize>,

    /// Consumer group for the telemetry log
    #[arg(long, env = "EventHubConsumerGroup")]
    consumer_group: Option<String>,

    /// Service connection string
    #[arg(long, env = "IOTHUB_CONNECTION_STRING", hide_env_values = true)]
    connection_string: Option<String>,

    /// Number of simulated thermostats
    #[arg(long)]
    simulate: Option<usize>,

    /// Simulated telemetry period (milliseconds)
    #[arg(long)]
    telemetry_interval_ms: Option<u64>,
}

impl Args {
    /// File (or default) configuration with command-line overrides applied.
    fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::from_file(path)?,
            None => GatewayConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(max) = self.max_clients {
            config.max_clients = max;
        }
        if let Some(group) = self.consumer_group.filter(|g| !g.is_empty()) {
            config.consumer_group = group;
        }
        if let Some(cs) = self.connection_string {
            config.connection_string = Some(cs);
        }
        if let Some(devices) = self.simulate {
            config.simulator.devices = devices;
        }
        if let Some(interval) = self.telemetry_interval_ms {
            config.simulator.telemetry_interval_ms = interval;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_ascii_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("pnplink Gateway v{}", env!("CARGO_PKG_VERSION"));

    let hub = MemoryHub::new(config.hub_name.clone());
    let connection = SharedConnection::new(config.parsed_connection_string()?);
    if connection.is_configured() {
        info!("Connection string configured");
    } else if config.simulator.devices > 0 {
        connection.replace(Some(hub.connection_string()));
        info!(hub = %config.hub_name, "Using in-process hub connection");
    } else {
        warn!("Connection string not configured");
    }

    // Telemetry relay
    let relay = TelemetryRelay::new(config.relay_config());
    let log: Arc<dyn IngestionLog> = Arc::new(hub.clone());
    let _relay_task = relay.start_broadcast(log, &config.consumer_group).await?;
    info!("Consumer group: {}", config.consumer_group);

    // Simulated devices
    let devices = simulator::spawn_thermostats(
        &hub,
        config.simulator.devices,
        config.telemetry_interval(),
    )
    .await?;
    if !devices.is_empty() {
        info!("Simulating {} thermostat(s)", devices.len());
    }

    let registry: Arc<dyn Registry> = Arc::new(hub);
    let state = Arc::new(AppState::new(
        connection,
        registry,
        relay.clone(),
        config.max_clients,
    ));
    let app = build_router(state);

    let addr = config.addr();
    info!("HTTP server: http://{}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for device in devices {
        device.abort();
    }
    relay.stop();
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::try_parse_from([
            "pnplink-gateway",
            "--port",
            "9000",
            "--simulate",
            "2",
            "--consumer-group",
            "dashboard",
        ])
        .unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.simulator.devices, 2);
        assert_eq!(config.consumer_group, "dashboard");
        assert_eq!(config.bind, "0.0.0.0");
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args =
            Args::try_parse_from(["pnplink-gateway", "--max-clients", "0"]).unwrap();
        assert!(matches!(args.into_config(), Err(ConfigError::Invalid(_))));
    }
}
