// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::transport::MemoryTransport;
use crate::config::ConnectionString;
use crate::error::{RegistryError, RelayError};
use crate::ingest::{IngestionLog, LogRecord};
use crate::registry::{
    ConnectionState, DesiredPatch, DeviceSummary, DeviceTwin, MethodResult, Registry,
    TwinProperties,
};
use crate::transport::{CommandHandler, CommandRequest, DesiredUpdate};
use crate::twin::{versioned_patch, TwinSection};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Default capacity of the hub's telemetry log.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Default direct-method timeout.
pub const DEFAULT_METHOD_TIMEOUT: Duration = Duration::from_secs(30);

pub(super) struct DeviceSections {
    pub(super) desired: TwinSection,
    pub(super) reported: TwinSection,
}

/// Hub-side record of one device.
pub(super) struct DeviceEntry {
    pub(super) device_id: String,
    pub(super) model_id: Mutex<Option<String>>,
    pub(super) sections: Mutex<DeviceSections>,
    pub(super) connected: AtomicBool,
    /// Deleted from the registry; sessions on it are closed for good.
    pub(super) removed: AtomicBool,
    pub(super) desired_sink: Mutex<Option<mpsc::Sender<DesiredUpdate>>>,
    pub(super) commands: DashMap<String, CommandHandler>,
}

impl DeviceEntry {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            model_id: Mutex::new(None),
            sections: Mutex::new(DeviceSections {
                desired: TwinSection::new(),
                reported: TwinSection::new(),
            }),
            connected: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            desired_sink: Mutex::new(None),
            commands: DashMap::new(),
        }
    }

    fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn twin(&self) -> DeviceTwin {
        let sections = self.sections.lock();
        DeviceTwin {
            device_id: self.device_id.clone(),
            model_id: self.model_id.lock().clone(),
            connection_state: self.connection_state(),
            properties: TwinProperties {
                desired: sections.desired.to_value(),
                reported: sections.reported.to_value(),
            },
        }
    }
}

pub(super) struct HubInner {
    pub(super) host_name: String,
    pub(super) devices: DashMap<String, Arc<DeviceEntry>>,
    pub(super) log: broadcast::Sender<LogRecord>,
    method_timeout: Duration,
}

/// Intra-process stand-in for the connectivity service.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self::with_settings(host_name, DEFAULT_LOG_CAPACITY, DEFAULT_METHOD_TIMEOUT)
    }

    pub fn with_settings(
        host_name: impl Into<String>,
        log_capacity: usize,
        method_timeout: Duration,
    ) -> Self {
        let (log, _) = broadcast::channel(log_capacity.max(1));
        let host_name = host_name.into();
        info!(hub = %host_name, "In-process hub created");
        Self {
            inner: Arc::new(HubInner {
                host_name,
                devices: DashMap::new(),
                log,
                method_timeout,
            }),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.inner.host_name
    }

    /// Service connection string accepted by this hub.
    pub fn connection_string(&self) -> ConnectionString {
        ConnectionString::from_parts(&self.inner.host_name, "owner", "aW4tcHJvY2Vzcw==")
    }

    /// Transport for `device_id`, registering the device on first use.
    pub fn device_transport(&self, device_id: &str) -> Arc<MemoryTransport> {
        let entry = self.entry_or_create(device_id);
        Arc::new(MemoryTransport::new(self.inner.clone(), entry))
    }

    /// Set the model identifier a device announces.
    pub fn set_model_id(&self, device_id: &str, model_id: impl Into<String>) {
        let entry = self.entry_or_create(device_id);
        *entry.model_id.lock() = Some(model_id.into());
    }

    /// Delete a device from the registry.
    ///
    /// Open sessions for it fail with `TransportError::Closed` from then on.
    /// Returns `false` when the device is unknown.
    pub fn remove_device(&self, device_id: &str) -> bool {
        let Some((_, entry)) = self.inner.devices.remove(device_id) else {
            return false;
        };
        entry.removed.store(true, Ordering::Release);
        entry.connected.store(false, Ordering::Release);
        entry.desired_sink.lock().take();
        entry.commands.clear();
        info!(device_id, "Device removed");
        true
    }

    /// Inject a record directly into the telemetry log.
    pub fn publish(&self, record: LogRecord) -> usize {
        self.inner.log.send(record).unwrap_or(0)
    }

    /// Reported section of a device, including `$version`.
    pub fn reported(&self, device_id: &str) -> Option<Value> {
        self.inner
            .devices
            .get(device_id)
            .map(|entry| entry.sections.lock().reported.to_value())
    }

    fn entry_or_create(&self, device_id: &str) -> Arc<DeviceEntry> {
        self.inner
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| {
                debug!(device_id, "Registering device");
                Arc::new(DeviceEntry::new(device_id))
            })
            .clone()
    }

    fn authorize(&self, connection: &ConnectionString) -> Result<(), RegistryError> {
        if connection.host_name() == self.inner.host_name {
            Ok(())
        } else {
            Err(RegistryError::Unauthorized(connection.host_name().to_string()))
        }
    }

    fn entry(&self, device_id: &str) -> Result<Arc<DeviceEntry>, RegistryError> {
        self.inner
            .devices
            .get(device_id)
            .map(|e| e.clone())
            .ok_or_else(|| RegistryError::DeviceNotFound(device_id.to_string()))
    }
}

#[async_trait]
impl Registry for MemoryHub {
    async fn list_devices(
        &self,
        connection: &ConnectionString,
    ) -> Result<Vec<DeviceSummary>, RegistryError> {
        self.authorize(connection)?;
        let mut devices: Vec<DeviceSummary> = self
            .inner
            .devices
            .iter()
            .map(|entry| DeviceSummary {
                device_id: entry.device_id.clone(),
                model_id: entry.model_id.lock().clone(),
                connection_state: entry.connection_state(),
            })
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(devices)
    }

    async fn get_twin(
        &self,
        connection: &ConnectionString,
        device_id: &str,
    ) -> Result<DeviceTwin, RegistryError> {
        self.authorize(connection)?;
        Ok(self.entry(device_id)?.twin())
    }

    async fn patch_twin(
        &self,
        connection: &ConnectionString,
        device_id: &str,
        patch: DesiredPatch,
    ) -> Result<DeviceTwin, RegistryError> {
        self.authorize(connection)?;
        let entry = self.entry(device_id)?;

        let patch = patch.into_value();
        let version = entry.sections.lock().desired.apply(&patch);
        debug!(device_id, version, "Desired properties patched");

        let sink = entry.desired_sink.lock().clone();
        if let Some(sink) = sink {
            let update = DesiredUpdate {
                version,
                properties: versioned_patch(&patch, version),
            };
            if sink.send(update).await.is_err() {
                warn!(device_id, version, "Device stopped listening for desired updates");
            }
        }

        Ok(entry.twin())
    }

    async fn invoke_method(
        &self,
        connection: &ConnectionString,
        device_id: &str,
        method: &str,
        payload: Value,
    ) -> Result<MethodResult, RegistryError> {
        self.authorize(connection)?;
        let entry = self.entry(device_id)?;

        if entry.connection_state() != ConnectionState::Connected {
            return Err(RegistryError::DeviceNotConnected(device_id.to_string()));
        }

        let handler = entry
            .commands
            .get(method)
            .map(|h| h.clone())
            .ok_or_else(|| RegistryError::MethodNotFound {
                device_id: device_id.to_string(),
                method: method.to_string(),
            })?;

        debug!(device_id, method, "Invoking direct method");
        let request = CommandRequest {
            name: method.to_string(),
            payload,
        };
        let response = tokio::time::timeout(self.inner.method_timeout, handler(request))
            .await
            .map_err(|_| RegistryError::Timeout(method.to_string()))?;

        Ok(MethodResult {
            status: response.status,
            payload: response.payload,
        })
    }
}

#[async_trait]
impl IngestionLog for MemoryHub {
    async fn subscribe(
        &self,
        consumer_group: &str,
    ) -> Result<BoxStream<'static, LogRecord>, RelayError> {
        if consumer_group.trim().is_empty() {
            return Err(RelayError::LogUnavailable(
                "consumer group name is empty".into(),
            ));
        }
        info!(consumer_group, hub = %self.inner.host_name, "Attaching to telemetry log");
        let rx = self.inner.log.subscribe();
        let group = consumer_group.to_string();

        let records = stream::unfold((rx, group), |(mut rx, group)| async move {
            loop {
                match rx.recv().await {
                    Ok(record) => return Some((record, (rx, group))),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(consumer_group = %group, skipped = n, "Telemetry log consumer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(records.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::command_handler;
    use crate::transport::{CommandResponse, DeviceTransport};
    use serde_json::json;

    #[tokio::test]
    async fn rejects_foreign_connection_string() {
        let hub = MemoryHub::new("hub-a.local");
        let other: ConnectionString = "HostName=hub-b.local".parse().unwrap();
        assert_eq!(
            hub.list_devices(&other).await,
            Err(RegistryError::Unauthorized("hub-b.local".into()))
        );
    }

    #[tokio::test]
    async fn lists_devices_sorted() {
        let hub = MemoryHub::new("hub.local");
        hub.device_transport("zeta");
        hub.device_transport("alpha");
        hub.set_model_id("alpha", "dtmi:example:Thermostat;1");

        let devices = hub.list_devices(&hub.connection_string()).await.unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(devices[0].model_id.as_deref(), Some("dtmi:example:Thermostat;1"));
        assert_eq!(devices[0].connection_state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn patch_twin_pushes_versioned_update() {
        let hub = MemoryHub::new("hub.local");
        let transport = hub.device_transport("dev1");
        transport.connect().await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        transport.register_desired_property_callback(tx).await.unwrap();

        let patch = DesiredPatch::component_property("thermostat", "targetTemperature", json!(70));
        let twin = hub
            .patch_twin(&hub.connection_string(), "dev1", patch)
            .await
            .unwrap();
        assert_eq!(twin.properties.desired["thermostat"]["targetTemperature"], 70);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.version, 2);
        assert_eq!(update.properties["$version"], 2);
        assert_eq!(update.properties["thermostat"]["targetTemperature"], 70);
    }

    #[tokio::test]
    async fn invoke_method_routes_to_handler() {
        let hub = MemoryHub::new("hub.local");
        let transport = hub.device_transport("dev1");
        transport.connect().await.unwrap();

        let handler = command_handler(|payload| async move {
            CommandResponse::ok(json!({"echo": payload}))
        });
        transport
            .register_command_handler("thermostat*echo", handler)
            .await
            .unwrap();

        let cs = hub.connection_string();
        let result = hub
            .invoke_method(&cs, "dev1", "thermostat*echo", json!(5))
            .await
            .unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.payload, json!({"echo": 5}));

        assert!(matches!(
            hub.invoke_method(&cs, "dev1", "missing", Value::Null).await,
            Err(RegistryError::MethodNotFound { .. })
        ));
        assert!(matches!(
            hub.invoke_method(&cs, "nobody", "x", Value::Null).await,
            Err(RegistryError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn invoke_method_requires_connection() {
        let hub = MemoryHub::new("hub.local");
        hub.device_transport("dev1");
        assert_eq!(
            hub.invoke_method(&hub.connection_string(), "dev1", "x", Value::Null)
                .await,
            Err(RegistryError::DeviceNotConnected("dev1".into()))
        );
    }

    #[tokio::test]
    async fn invoke_method_times_out() {
        let hub = MemoryHub::with_settings("hub.local", 8, Duration::from_millis(20));
        let transport = hub.device_transport("dev1");
        transport.connect().await.unwrap();
        let handler = command_handler(|_payload| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            CommandResponse::ok(Value::Null)
        });
        transport.register_command_handler("slow", handler).await.unwrap();

        assert_eq!(
            hub.invoke_method(&hub.connection_string(), "dev1", "slow", Value::Null)
                .await,
            Err(RegistryError::Timeout("slow".into()))
        );
    }

    #[tokio::test]
    async fn log_stream_yields_published_records() {
        let hub = MemoryHub::new("hub.local");
        let mut records = hub.subscribe("$Default").await.unwrap();
        hub.publish(LogRecord::new(json!({"t": 1})).with_device("dev1"));

        let record = records.next().await.unwrap();
        assert_eq!(record.body, json!({"t": 1}));
        assert_eq!(record.device_id.as_deref(), Some("dev1"));
    }
}
