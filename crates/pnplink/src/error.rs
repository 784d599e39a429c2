// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared across the device and gateway sides.

use thiserror::Error;

/// Boxed error returned by user-supplied handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Connectivity/session errors raised by a [`DeviceTransport`](crate::transport::DeviceTransport).
///
/// Surfaced to the caller as-is; nothing in this crate retries them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport session is not connected")]
    NotConnected,

    #[error("Transport session closed")]
    Closed,

    #[error("Transport rejected request: {0}")]
    Rejected(String),
}

/// Malformed wire structure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Expected a JSON object at document root, found {0}")]
    NotAnObject(&'static str),

    #[error("Component '{component}' entry is {found}, expected an object")]
    ComponentNotAnObject {
        component: String,
        found: &'static str,
    },

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for EncodingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Desired value that is empty or cannot be coerced to the handler's type.
///
/// Never escapes as an error: it turns into an `Invalid` ack.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidPropertyValue {
    #[error("empty value")]
    Empty,

    #[error("cannot coerce value: {0}")]
    Coercion(String),
}

/// An ack older than the latest one recorded for the same property.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Stale version {received} (latest is {latest})")]
pub struct StaleVersion {
    pub received: i64,
    pub latest: i64,
}

/// Top-level error for device-side operations.
#[derive(Debug, Error)]
pub enum PnpError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Invalid property value: {0}")]
    InvalidValue(#[from] InvalidPropertyValue),

    #[error("Invalid component name '{0}'")]
    InvalidComponentName(String),

    #[error("Component '{0}' already exists on this device")]
    DuplicateComponent(String),
}

/// Failures delivered to a device session's error boundary.
///
/// These happen on background tasks (desired-property workers) and have no
/// caller to return to, so the session hands them to the closure installed
/// with [`DeviceBuilder::on_error`](crate::device::DeviceBuilder::on_error).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Handler for {component}.{property} (version {version}) failed: {source}")]
    Handler {
        component: String,
        property: String,
        version: i64,
        #[source]
        source: HandlerError,
    },

    #[error("Failed to send ack for {component}.{property} (version {version}): {source}")]
    AckSend {
        component: String,
        property: String,
        version: i64,
        #[source]
        source: TransportError,
    },

    #[error("Failed to decode desired update (version {version}): {source}")]
    Decode {
        version: i64,
        #[source]
        source: EncodingError,
    },
}

/// Errors from a [`Registry`](crate::registry::Registry) collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection string not configured")]
    NotConfigured,

    #[error("Connection string rejected for hub '{0}'")]
    Unauthorized(String),

    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Device '{0}' is not connected")]
    DeviceNotConnected(String),

    #[error("Method '{method}' not registered on device '{device_id}'")]
    MethodNotFound { device_id: String, method: String },

    #[error("Method '{0}' timed out")]
    Timeout(String),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),
}

/// Errors from the telemetry relay.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Relay already started")]
    AlreadyStarted,

    #[error("Ingestion log unavailable: {0}")]
    LogUnavailable(String),
}
