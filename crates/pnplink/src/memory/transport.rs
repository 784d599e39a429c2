// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::hub::{DeviceEntry, HubInner};
use crate::error::TransportError;
use crate::ingest::LogRecord;
use crate::transport::{
    CommandHandler, DesiredUpdate, DeviceTransport, DocumentSnapshot, TelemetryEnvelope,
    SUBJECT_PROPERTY,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Device-side session with a [`MemoryHub`](super::MemoryHub).
pub struct MemoryTransport {
    hub: Arc<HubInner>,
    device: Arc<DeviceEntry>,
}

impl MemoryTransport {
    pub(super) fn new(hub: Arc<HubInner>, device: Arc<DeviceEntry>) -> Self {
        Self { hub, device }
    }

    pub fn device_id(&self) -> &str {
        &self.device.device_id
    }

    pub fn is_connected(&self) -> bool {
        self.device.connected.load(Ordering::Acquire)
    }

    /// Drop the session: later calls fail with `NotConnected` and the
    /// desired-update channel is released.
    pub fn disconnect(&self) {
        if self.device.connected.swap(false, Ordering::AcqRel) {
            info!(device_id = %self.device.device_id, "Device disconnected");
        }
        self.device.desired_sink.lock().take();
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.device.removed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl DeviceTransport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.device.removed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !self.device.connected.swap(true, Ordering::AcqRel) {
            info!(device_id = %self.device.device_id, hub = %self.hub.host_name, "Device connected");
        }
        Ok(())
    }

    async fn send_event(&self, envelope: TelemetryEnvelope) -> Result<(), TransportError> {
        self.ensure_connected()?;

        let component = envelope.component_name().to_string();
        let record = LogRecord::new(LogRecord::decode_body(envelope.body()))
            .with_device(self.device.device_id.clone())
            .with_enqueued_time(Utc::now())
            .with_property(SUBJECT_PROPERTY, component)
            .with_property("content-type", envelope.content_type())
            .with_property("content-encoding", envelope.content_encoding());

        // No live consumer is not an error: the log simply drops the record.
        let receivers = self.hub.log.send(record).unwrap_or(0);
        trace!(device_id = %self.device.device_id, receivers, "Telemetry appended to log");
        Ok(())
    }

    async fn get_document(&self) -> Result<DocumentSnapshot, TransportError> {
        self.ensure_connected()?;
        let sections = self.device.sections.lock();
        Ok(DocumentSnapshot {
            desired: sections.desired.to_value(),
            reported: sections.reported.to_value(),
        })
    }

    async fn patch_reported_properties(&self, patch: Value) -> Result<(), TransportError> {
        self.ensure_connected()?;
        if !patch.is_object() {
            return Err(TransportError::Rejected(
                "reported patch must be a JSON object".into(),
            ));
        }
        let version = self.device.sections.lock().reported.apply(&patch);
        trace!(device_id = %self.device.device_id, version, "Reported properties patched");
        Ok(())
    }

    async fn register_command_handler(
        &self,
        wire_name: &str,
        handler: CommandHandler,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        debug!(device_id = %self.device.device_id, wire_name, "Command handler registered");
        self.device.commands.insert(wire_name.to_string(), handler);
        Ok(())
    }

    async fn register_desired_property_callback(
        &self,
        sink: mpsc::Sender<DesiredUpdate>,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        *self.device.desired_sink.lock() = Some(sink);
        Ok(())
    }
}
