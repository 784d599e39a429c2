// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device session: owns the transport and drives desired-property acks.
//!
//! The transport pushes every desired patch onto one channel. A dispatcher
//! task decodes the patch for every subscribed (component, property) pair
//! and hands non-absent values to that pair's worker task. Each worker runs
//! the full ack sequence (Pending -> handler -> Completed/Invalid) before
//! taking its next event, so updates to one pair never overlap while
//! different pairs proceed independently.

use crate::ack::{self, AckEvent, AckRecord, AckTracker, PropertyKey, Resolution};
use crate::codec;
use crate::component::Component;
use crate::error::{HandlerError, InvalidPropertyValue, PnpError, SessionError, TransportError};
use crate::transport::{CommandHandler, CommandRequest, CommandResponse, DesiredUpdate, DeviceTransport};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Default capacity of the desired-update channel handed to the transport,
/// and of each property's queue.
pub const DEFAULT_DESIRED_BUFFER: usize = 64;

/// Receives failures that happen on background tasks.
pub type ErrorBoundary = Arc<dyn Fn(SessionError) + Send + Sync>;

/// What a desired-property handler did with a value.
pub(crate) enum HandlerOutcome {
    Applied,
    Invalid(InvalidPropertyValue),
    Failed(HandlerError),
}

/// Type-erased desired-property handler (coercion included).
pub(crate) type DesiredHandler = Arc<dyn Fn(&Value) -> HandlerOutcome + Send + Sync>;

struct DesiredEvent {
    value: Value,
    version: i64,
}

struct PropertyWorker {
    handler: Arc<Mutex<DesiredHandler>>,
    tx: mpsc::Sender<DesiredEvent>,
}

/// State shared by the dispatcher, the per-pair workers and the components.
pub(crate) struct DesiredRouter {
    transport: Arc<dyn DeviceTransport>,
    tracker: Arc<Mutex<AckTracker>>,
    workers: DashMap<PropertyKey, PropertyWorker>,
    components: DashSet<String>,
    on_error: ErrorBoundary,
    reject_unhandled: bool,
    worker_buffer: usize,
    cancel: CancellationToken,
}

impl DesiredRouter {
    /// Install (or replace) the handler for `key` and reset its ack state.
    ///
    /// An update already past its `Pending` ack still gets its terminal ack;
    /// the reset applies to the versions after it.
    ///
    /// Must be called from within a tokio runtime: the first subscription
    /// for a pair spawns its worker.
    pub(crate) fn subscribe(&self, key: PropertyKey, handler: DesiredHandler) {
        self.tracker.lock().reset(&key);

        match self.workers.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(%key, "Replacing desired-property handler");
                *entry.get().handler.lock() = handler;
            }
            Entry::Vacant(entry) => {
                debug!(%key, "Subscribing desired-property handler");
                let (tx, rx) = mpsc::channel(self.worker_buffer);
                let slot = Arc::new(Mutex::new(handler));
                entry.insert(PropertyWorker {
                    handler: slot.clone(),
                    tx,
                });

                let worker = AckWorker {
                    key,
                    transport: self.transport.clone(),
                    tracker: self.tracker.clone(),
                    handler: slot,
                    on_error: self.on_error.clone(),
                };
                tokio::spawn(worker.run(rx, self.cancel.clone()));
            }
        }
    }

    pub(crate) fn register_component(&self, name: &str) -> Result<(), PnpError> {
        if name.is_empty() || name.contains(codec::COMMAND_SEPARATOR) {
            return Err(PnpError::InvalidComponentName(name.to_string()));
        }
        if !self.components.insert(name.to_string()) {
            return Err(PnpError::DuplicateComponent(name.to_string()));
        }
        Ok(())
    }

    fn ack_record(&self, key: &PropertyKey) -> Option<AckRecord> {
        self.tracker.lock().get(key).cloned()
    }

    async fn dispatch(&self, update: DesiredUpdate) {
        trace!(version = update.version, properties = %update.properties, "Received desired update");

        let mut failed_components = HashSet::new();
        let mut errors = Vec::new();
        let mut deliveries = Vec::new();
        for worker in self.workers.iter() {
            let key = worker.key();
            if failed_components.contains(&key.component) {
                continue;
            }
            match codec::decode(&update.properties, &key.component, &key.property) {
                Ok(Some(value)) => {
                    let event = DesiredEvent {
                        value,
                        version: update.version,
                    };
                    deliveries.push((key.clone(), worker.tx.clone(), event));
                }
                Ok(None) => {}
                Err(source) => {
                    failed_components.insert(key.component.clone());
                    errors.push(SessionError::Decode {
                        version: update.version,
                        source,
                    });
                }
            }
        }
        // Reported outside the map iteration so the boundary may subscribe.
        for err in errors {
            (self.on_error)(err);
        }

        // A full queue holds the dispatcher (and so the transport) back.
        for (key, tx, event) in deliveries {
            if tx.send(event).await.is_err() {
                warn!(%key, "Desired-property worker stopped, dropping update");
            }
        }

        if self.reject_unhandled {
            self.reject_unhandled_properties(&update).await;
        }
    }

    /// Answer `NotImplemented` for properties of known components that
    /// nobody subscribed to.
    async fn reject_unhandled_properties(&self, update: &DesiredUpdate) {
        let mut unhandled = Vec::new();
        for component in self.components.iter() {
            let Ok(properties) = codec::component_properties(&update.properties, component.key())
            else {
                continue;
            };
            for property in properties {
                let key = PropertyKey::new(component.key().clone(), property);
                if self.workers.contains_key(&key) {
                    continue;
                }
                let value = update.properties[&key.component][&key.property].clone();
                unhandled.push((key, value));
            }
        }

        for (key, value) in unhandled {
            let ack = {
                let mut tracker = self.tracker.lock();
                tracker.unhandled(&key, value, update.version)
            };
            let Some(ack) = ack else { continue };

            debug!(%key, version = update.version, "No handler, reporting not implemented");
            if let Err(source) = send_ack(self.transport.as_ref(), &ack).await {
                (self.on_error)(SessionError::AckSend {
                    component: key.component,
                    property: key.property,
                    version: update.version,
                    source,
                });
            }
        }
    }

    async fn run_dispatcher(self: Arc<Self>, mut rx: mpsc::Receiver<DesiredUpdate>) {
        loop {
            let update = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                update = rx.recv() => match update {
                    Some(update) => update,
                    None => {
                        debug!("Desired-update channel closed");
                        break;
                    }
                },
            };
            self.dispatch(update).await;
        }
        debug!("Desired-update dispatcher stopped");
    }
}

/// Runs the ack sequence for one (component, property) pair.
struct AckWorker {
    key: PropertyKey,
    transport: Arc<dyn DeviceTransport>,
    tracker: Arc<Mutex<AckTracker>>,
    handler: Arc<Mutex<DesiredHandler>>,
    on_error: ErrorBoundary,
}

impl AckWorker {
    async fn run(self, mut rx: mpsc::Receiver<DesiredEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.process(event).await;
        }
        trace!(key = %self.key, "Desired-property worker stopped");
    }

    async fn process(&self, event: DesiredEvent) {
        let version = event.version;

        let pending = {
            let mut tracker = self.tracker.lock();
            tracker.receive(&self.key, event.value.clone(), version)
        };
        let Some(pending) = pending else { return };

        // Acknowledge before applying.
        if let Err(source) = send_ack(self.transport.as_ref(), &pending).await {
            self.report_send_failure(version, source);
            return;
        }

        let handler = self.handler.lock().clone();
        let resolution = match handler(&event.value) {
            HandlerOutcome::Applied => Resolution::Completed,
            HandlerOutcome::Invalid(reason) => {
                debug!(key = %self.key, version, %reason, "Rejecting desired value");
                Resolution::Invalid
            }
            HandlerOutcome::Failed(source) => {
                // The Pending ack stays; no terminal ack for this version.
                (self.on_error)(SessionError::Handler {
                    component: self.key.component.clone(),
                    property: self.key.property.clone(),
                    version,
                    source,
                });
                return;
            }
        };

        let done = {
            let mut tracker = self.tracker.lock();
            match tracker.resolve(&self.key, version, resolution) {
                Some(done) => Some(done),
                // Reset by a resubscribe while the handler ran: this version
                // was applied, so finish it without recording it.
                None if tracker.get(&self.key).is_none() => ack::transition(
                    &self.key,
                    Some(&pending),
                    AckEvent::Resolved {
                        version,
                        resolution,
                    },
                )
                .ok(),
                None => None,
            }
        };
        let Some(done) = done else { return };

        if let Err(source) = send_ack(self.transport.as_ref(), &done).await {
            self.report_send_failure(version, source);
        } else {
            trace!(key = %self.key, version, status = done.status.code(), "Desired property processed");
        }
    }

    fn report_send_failure(&self, version: i64, source: TransportError) {
        (self.on_error)(SessionError::AckSend {
            component: self.key.component.clone(),
            property: self.key.property.clone(),
            version,
            source,
        });
    }
}

async fn send_ack(transport: &dyn DeviceTransport, record: &AckRecord) -> Result<(), TransportError> {
    transport
        .patch_reported_properties(codec::encode_ack(record))
        .await?;
    trace!(
        component = %record.component,
        property = %record.property,
        version = record.version,
        status = record.status.code(),
        "Reported writable property ack"
    );
    Ok(())
}

fn log_session_error(err: SessionError) {
    error!("Device session error: {}", err);
}

/// Builder for [`Device`].
pub struct DeviceBuilder {
    transport: Arc<dyn DeviceTransport>,
    on_error: ErrorBoundary,
    reject_unhandled: bool,
    desired_buffer: usize,
}

impl DeviceBuilder {
    /// Install the error boundary (default: log at `error`).
    pub fn on_error<F>(mut self, boundary: F) -> Self
    where
        F: Fn(SessionError) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(boundary);
        self
    }

    /// Answer `NotImplemented` for desired properties of this device's
    /// components that have no handler.
    pub fn reject_unhandled(mut self, enabled: bool) -> Self {
        self.reject_unhandled = enabled;
        self
    }

    /// Capacity of the desired-update channel and of each property's queue.
    pub fn desired_buffer(mut self, capacity: usize) -> Self {
        self.desired_buffer = capacity.max(1);
        self
    }

    /// Connect the transport and start the desired-update dispatcher.
    pub async fn connect(self) -> Result<Device, TransportError> {
        self.transport.connect().await?;

        let (tx, rx) = mpsc::channel(self.desired_buffer);
        self.transport.register_desired_property_callback(tx).await?;

        let cancel = CancellationToken::new();
        let router = Arc::new(DesiredRouter {
            transport: self.transport.clone(),
            tracker: Arc::new(Mutex::new(AckTracker::new())),
            workers: DashMap::new(),
            components: DashSet::new(),
            on_error: self.on_error,
            reject_unhandled: self.reject_unhandled,
            worker_buffer: self.desired_buffer,
            cancel: cancel.clone(),
        });
        tokio::spawn(router.clone().run_dispatcher(rx));

        info!("Device session connected");
        Ok(Device {
            transport: self.transport,
            router,
            cancel,
        })
    }
}

/// A connected device session.
///
/// Dropping the device (or calling [`Device::shutdown`]) stops desired-update
/// processing for all of its components.
pub struct Device {
    transport: Arc<dyn DeviceTransport>,
    router: Arc<DesiredRouter>,
    cancel: CancellationToken,
}

impl Device {
    pub fn builder(transport: Arc<dyn DeviceTransport>) -> DeviceBuilder {
        DeviceBuilder {
            transport,
            on_error: Arc::new(log_session_error),
            reject_unhandled: false,
            desired_buffer: DEFAULT_DESIRED_BUFFER,
        }
    }

    /// Connect with default settings.
    pub async fn connect(transport: Arc<dyn DeviceTransport>) -> Result<Self, TransportError> {
        Self::builder(transport).connect().await
    }

    /// Create the facade for a named component.
    ///
    /// Names must be non-empty, unique on this device, and free of `*`.
    pub fn component(&self, name: &str) -> Result<Component, PnpError> {
        self.router.register_component(name)?;
        info!(component = name, "New component");
        Ok(Component::new(
            name,
            self.transport.clone(),
            self.router.clone(),
        ))
    }

    /// Register a root-device command (no component prefix).
    pub async fn register_root_command<F, Fut>(
        &self,
        command: &str,
        handler: F,
    ) -> Result<(), TransportError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResponse> + Send + 'static,
    {
        debug!(command, "Set root command handler");
        self.transport
            .register_command_handler(command, command_handler(handler))
            .await
    }

    /// Latest ack recorded for a pair.
    pub fn ack_record(&self, component: &str, property: &str) -> Option<AckRecord> {
        self.router.ack_record(&PropertyKey::new(component, property))
    }

    pub fn transport(&self) -> &Arc<dyn DeviceTransport> {
        &self.transport
    }

    /// Stop the dispatcher and all desired-property workers.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Device session shutting down");
            self.cancel.cancel();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Wrap an async closure over the payload as a transport [`CommandHandler`].
pub(crate) fn command_handler<F, Fut>(handler: F) -> CommandHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CommandResponse> + Send + 'static,
{
    Arc::new(move |request: CommandRequest| -> BoxFuture<'static, CommandResponse> {
        Box::pin(handler(request.payload))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHub;

    #[tokio::test]
    async fn component_names_are_validated() {
        let hub = MemoryHub::new("hub.local");
        let device = Device::connect(hub.device_transport("dev1")).await.unwrap();

        assert!(matches!(
            device.component(""),
            Err(PnpError::InvalidComponentName(_))
        ));
        assert!(matches!(
            device.component("a*b"),
            Err(PnpError::InvalidComponentName(_))
        ));
        assert!(device.component("thermostat").is_ok());
        assert!(matches!(
            device.component("thermostat"),
            Err(PnpError::DuplicateComponent(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let hub = MemoryHub::new("hub.local");
        let device = Device::connect(hub.device_transport("dev1")).await.unwrap();
        device.shutdown();
        device.shutdown();
        assert!(device.cancel.is_cancelled());
    }
}
