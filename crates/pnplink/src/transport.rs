// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device-side transport boundary.
//!
//! The transport owns the session with the connectivity service (connect,
//! authenticate, raw send/receive). This crate only drives it through
//! [`DeviceTransport`]; [`crate::memory`] provides an intra-process
//! implementation.

use crate::error::TransportError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Message property carrying the component name on telemetry.
pub const SUBJECT_PROPERTY: &str = "$.sub";

/// Default telemetry content type.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Telemetry content encoding.
pub const CONTENT_ENCODING: &str = "utf-8";

/// One outbound telemetry message, tagged with its component.
///
/// Fields are private: an envelope is immutable once built and is moved into
/// [`DeviceTransport::send_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEnvelope {
    component_name: String,
    body: Vec<u8>,
    content_type: String,
}

impl TelemetryEnvelope {
    pub fn new(
        component_name: impl Into<String>,
        body: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            component_name: component_name.into(),
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_encoding(&self) -> &'static str {
        CONTENT_ENCODING
    }

    /// Application properties attached on the wire.
    pub fn properties(&self) -> [(&'static str, &str); 1] {
        [(SUBJECT_PROPERTY, self.component_name.as_str())]
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// A desired-properties patch pushed by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredUpdate {
    /// Service-assigned, monotonically increasing.
    pub version: i64,
    /// Raw patch, component sections at the top level.
    pub properties: Value,
}

/// Full device document as seen by the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub desired: Value,
    pub reported: Value,
}

/// Incoming command invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Wire name (`component*command` for component commands).
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

/// Result of a command handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: u16,
    #[serde(default)]
    pub payload: Value,
}

impl CommandResponse {
    pub fn ok(payload: Value) -> Self {
        Self {
            status: 200,
            payload,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            payload: Value::String(message.into()),
        }
    }
}

/// Async command callback registered with the transport.
pub type CommandHandler =
    Arc<dyn Fn(CommandRequest) -> BoxFuture<'static, CommandResponse> + Send + Sync>;

/// Session with the device-connectivity service.
///
/// Implementations serialize callbacks for a given session; command handlers
/// may run concurrently with desired-update delivery.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Open the session.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send one telemetry message.
    async fn send_event(&self, envelope: TelemetryEnvelope) -> Result<(), TransportError>;

    /// Fetch the full device document.
    async fn get_document(&self) -> Result<DocumentSnapshot, TransportError>;

    /// Apply one reported-properties patch.
    async fn patch_reported_properties(&self, patch: Value) -> Result<(), TransportError>;

    /// Route invocations of `wire_name` to `handler`, replacing any previous one.
    async fn register_command_handler(
        &self,
        wire_name: &str,
        handler: CommandHandler,
    ) -> Result<(), TransportError>;

    /// Deliver every desired-properties patch onto `sink`.
    async fn register_desired_property_callback(
        &self,
        sink: mpsc::Sender<DesiredUpdate>,
    ) -> Result<(), TransportError>;
}
