// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pnplink::memory::{MemoryHub, MemoryTransport};
use pnplink::transport::CommandHandler;
use pnplink::{DesiredUpdate, DeviceTransport, DocumentSnapshot, TelemetryEnvelope, TransportError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

/// Transport that forwards to the in-process hub and records every
/// reported patch, in order.
pub struct RecordingTransport {
    inner: Arc<MemoryTransport>,
    patches: mpsc::UnboundedSender<Value>,
    desired: Mutex<Option<mpsc::Sender<DesiredUpdate>>>,
}

impl RecordingTransport {
    pub fn new(inner: Arc<MemoryTransport>) -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            inner,
            patches: tx,
            desired: Mutex::new(None),
        });
        (transport, rx)
    }

    /// Push a desired update as the service would.
    pub async fn push_desired(&self, version: i64, properties: Value) {
        let sink = self.desired.lock().clone();
        sink.expect("desired callback registered")
            .send(DesiredUpdate {
                version,
                properties,
            })
            .await
            .expect("dispatcher running");
    }
}

#[async_trait]
impl DeviceTransport for RecordingTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    async fn send_event(&self, envelope: TelemetryEnvelope) -> Result<(), TransportError> {
        self.inner.send_event(envelope).await
    }

    async fn get_document(&self) -> Result<DocumentSnapshot, TransportError> {
        self.inner.get_document().await
    }

    async fn patch_reported_properties(&self, patch: Value) -> Result<(), TransportError> {
        self.inner.patch_reported_properties(patch.clone()).await?;
        let _ = self.patches.send(patch);
        Ok(())
    }

    async fn register_command_handler(
        &self,
        wire_name: &str,
        handler: CommandHandler,
    ) -> Result<(), TransportError> {
        self.inner.register_command_handler(wire_name, handler).await
    }

    async fn register_desired_property_callback(
        &self,
        sink: mpsc::Sender<DesiredUpdate>,
    ) -> Result<(), TransportError> {
        *self.desired.lock() = Some(sink.clone());
        self.inner.register_desired_property_callback(sink).await
    }
}

/// Hub with one recorded device named `dev1`.
pub fn recorded_device(hub: &MemoryHub) -> (Arc<RecordingTransport>, mpsc::UnboundedReceiver<Value>) {
    RecordingTransport::new(hub.device_transport("dev1"))
}

/// Next recorded patch, failing the test after [`WAIT`].
pub async fn next_patch(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for reported patch")
        .expect("patch channel closed")
}

/// Assert nothing else gets reported within a short grace period.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Value>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "unexpected extra reported patch");
}
