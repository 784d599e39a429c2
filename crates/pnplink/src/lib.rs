// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! pnplink: component-scoped device properties and telemetry relay
//!
//! Device side: a [`Device`] session over a [`DeviceTransport`] hands out
//! named [`Component`]s that send telemetry, report properties, register
//! commands and subscribe to desired properties. Every desired update is
//! acknowledged back to the service through the [`ack`] state machine.
//!
//! Service side: a [`TelemetryRelay`] consumes the [`IngestionLog`] and
//! fans records out to subscribers; the [`Registry`] boundary exposes
//! device listing, twins and direct methods.
//!
//! # Features
//!
//! - **Component wire encoding**: `"__t": "c"` marked sections, `*` command names
//! - **Desired-property acks**: pending, then completed or invalid, per version
//! - **Last writer wins**: stale acks are dropped
//! - **Fan-out**: slow or closed subscribers are dropped, never block others
//! - **In-process hub**: [`memory::MemoryHub`] for tests and simulation
//!
//! # Quick Start
//!
//! ```no_run
//! use pnplink::{Device, memory::MemoryHub};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = MemoryHub::new("hub.local");
//! let device = Device::connect(hub.device_transport("dev1")).await?;
//! let thermostat = device.component("thermostat")?;
//!
//! thermostat.subscribe_desired_property("targetTemperature", |target: f64| {
//!     println!("new target {target}");
//!     Ok(())
//! });
//! thermostat.send_telemetry_json(&serde_json::json!({"temperature": 21.5})).await?;
//! # Ok(())
//! # }
//! ```

pub mod ack;
pub mod codec;
pub mod component;
pub mod config;
pub mod device;
pub mod error;
pub mod ingest;
pub mod memory;
pub mod registry;
pub mod relay;
pub mod transport;
pub mod twin;

pub use ack::{AckRecord, AckStatus, AckTracker, PropertyKey};
pub use component::Component;
pub use config::{ConnectionString, SharedConnection};
pub use device::{Device, DeviceBuilder};
pub use error::{
    EncodingError, HandlerError, InvalidPropertyValue, PnpError, RegistryError, RelayError,
    SessionError, StaleVersion, TransportError,
};
pub use ingest::{IngestionLog, LogRecord};
pub use registry::{DesiredPatch, DeviceSummary, DeviceTwin, MethodResult, Registry};
pub use relay::{RelayConfig, RelayRecord, SubscriberId, SubscriberSet, TelemetryRelay};
pub use transport::{
    CommandRequest, CommandResponse, DesiredUpdate, DeviceTransport, DocumentSnapshot,
    TelemetryEnvelope,
};
