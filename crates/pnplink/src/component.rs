// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-component facade over a device session.
//!
//! A [`Component`] scopes telemetry, properties and commands to one named
//! sub-device. It holds no state of its own beyond its name; ack state lives
//! in the session that created it.

use crate::ack::PropertyKey;
use crate::codec;
use crate::device::{command_handler, DesiredHandler, DesiredRouter, HandlerOutcome};
use crate::error::{EncodingError, HandlerError, PnpError, TransportError};
use crate::transport::{CommandResponse, DeviceTransport, TelemetryEnvelope, DEFAULT_CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// Named component of a connected [`Device`](crate::device::Device).
#[derive(Clone)]
pub struct Component {
    name: Arc<str>,
    transport: Arc<dyn DeviceTransport>,
    router: Arc<DesiredRouter>,
}

impl Component {
    pub(crate) fn new(
        name: &str,
        transport: Arc<dyn DeviceTransport>,
        router: Arc<DesiredRouter>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            transport,
            router,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one telemetry message as `application/json`.
    pub async fn send_telemetry(&self, body: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.send_telemetry_with(body, DEFAULT_CONTENT_TYPE).await
    }

    /// Send one telemetry message with an explicit content type.
    pub async fn send_telemetry_with(
        &self,
        body: impl Into<Vec<u8>>,
        content_type: &str,
    ) -> Result<(), TransportError> {
        let envelope = TelemetryEnvelope::new(&*self.name, body, content_type);
        trace!(component = %self.name, bytes = envelope.body().len(), "Sending telemetry");
        self.transport.send_event(envelope).await
    }

    /// Serialize `value` as JSON and send it as telemetry.
    pub async fn send_telemetry_json<T>(&self, value: &T) -> Result<(), PnpError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value).map_err(EncodingError::from)?;
        self.send_telemetry(body).await?;
        Ok(())
    }

    /// Report a device-side property value.
    ///
    /// The patch is fully encoded before it reaches the transport, so
    /// concurrent reports of different properties never interleave.
    pub async fn report_property<T>(&self, name: &str, value: &T) -> Result<(), PnpError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value).map_err(EncodingError::from)?;
        let patch = codec::encode(&self.name, name, value);
        trace!(component = %self.name, property = name, "Reporting property");
        self.transport.patch_reported_properties(patch).await?;
        Ok(())
    }

    /// Register `handler` for `command` on this component.
    ///
    /// Registering the same command again replaces the previous handler.
    pub async fn register_command<F, Fut>(&self, command: &str, handler: F) -> Result<(), TransportError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResponse> + Send + 'static,
    {
        let wire_name = codec::join_command_name(&self.name, command);
        debug!(component = %self.name, command, wire_name = %wire_name, "Set command handler");
        self.transport
            .register_command_handler(&wire_name, command_handler(handler))
            .await
    }

    /// Drive `handler` with desired updates for `property`, acknowledging each.
    ///
    /// Values are coerced to `T` first; an empty or non-coercible value is
    /// acknowledged as invalid without calling the handler. An `Err` from the
    /// handler goes to the session's error boundary and leaves the update
    /// pending. Subscribing again replaces the handler and resets the
    /// property's ack state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_desired_property<T, F>(&self, property: &str, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let erased: DesiredHandler = Arc::new(move |value: &Value| match codec::coerce::<T>(value) {
            Ok(typed) => match handler(typed) {
                Ok(()) => HandlerOutcome::Applied,
                Err(err) => HandlerOutcome::Failed(err),
            },
            Err(invalid) => HandlerOutcome::Invalid(invalid),
        });
        self.router
            .subscribe(PropertyKey::new(&*self.name, property), erased);
    }

    /// Point-in-time read of a desired property from the full document.
    ///
    /// Does not take part in the ack protocol.
    pub async fn read_desired_property(&self, property: &str) -> Result<Option<Value>, PnpError> {
        let document = self.transport.get_document().await?;
        let value = codec::decode(&document.desired, &self.name, property)?;
        trace!(component = %self.name, property, ?value, "Read desired property");
        Ok(value)
    }

    /// [`read_desired_property`](Self::read_desired_property) coerced to `T`.
    ///
    /// Absent and empty values read as `None`.
    pub async fn read_desired_property_as<T>(&self, property: &str) -> Result<Option<T>, PnpError>
    where
        T: DeserializeOwned,
    {
        match self.read_desired_property(property).await? {
            Some(value) if !codec::is_empty_value(&value) => Ok(Some(codec::coerce(&value)?)),
            _ => Ok(None),
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component").field("name", &self.name).finish()
    }
}
