// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service-side registry boundary (device list, twins, direct methods).

use crate::codec;
use crate::config::ConnectionString;
use crate::error::RegistryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Registry listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub connection_state: ConnectionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Service view of a device document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTwin {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub connection_state: ConnectionState,
    pub properties: TwinProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinProperties {
    pub desired: Value,
    pub reported: Value,
}

/// Desired-properties patch submitted by an operator.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredPatch(Value);

impl DesiredPatch {
    /// Root-level property.
    pub fn property(name: &str, value: Value) -> Self {
        let mut root = Map::new();
        root.insert(name.to_string(), value);
        Self(Value::Object(root))
    }

    /// Property scoped to a named component.
    pub fn component_property(component: &str, name: &str, value: Value) -> Self {
        Self(codec::encode(component, name, value))
    }

    /// Pre-built patch document; must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self, RegistryError> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(RegistryError::InvalidPatch(
                "desired patch must be a JSON object".into(),
            ))
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Direct-method invocation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodResult {
    pub status: u16,
    #[serde(default)]
    pub payload: Value,
}

/// Registry/service client.
///
/// Every call receives the connection snapshot taken at the start of the
/// request, so a concurrent reconfiguration never splits one request across
/// two hubs.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn list_devices(
        &self,
        connection: &ConnectionString,
    ) -> Result<Vec<DeviceSummary>, RegistryError>;

    async fn get_twin(
        &self,
        connection: &ConnectionString,
        device_id: &str,
    ) -> Result<DeviceTwin, RegistryError>;

    async fn patch_twin(
        &self,
        connection: &ConnectionString,
        device_id: &str,
        patch: DesiredPatch,
    ) -> Result<DeviceTwin, RegistryError>;

    async fn invoke_method(
        &self,
        connection: &ConnectionString,
        device_id: &str,
        method: &str,
        payload: Value,
    ) -> Result<MethodResult, RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn component_patch_is_nested() {
        let patch = DesiredPatch::component_property("thermostat", "targetTemperature", json!(70));
        assert_eq!(
            patch.into_value(),
            json!({"thermostat": {"targetTemperature": 70}})
        );
    }

    #[test]
    fn from_value_requires_object() {
        assert!(DesiredPatch::from_value(json!({"a": 1})).is_ok());
        assert!(matches!(
            DesiredPatch::from_value(json!(5)),
            Err(RegistryError::InvalidPatch(_))
        ));
    }

    #[test]
    fn twin_serializes_camel_case() {
        let twin = DeviceTwin {
            device_id: "dev1".into(),
            model_id: Some("dtmi:example:Thermostat;1".into()),
            connection_state: ConnectionState::Connected,
            properties: TwinProperties::default(),
        };
        let json = serde_json::to_value(&twin).unwrap();
        assert_eq!(json["deviceId"], "dev1");
        assert_eq!(json["modelId"], "dtmi:example:Thermostat;1");
        assert_eq!(json["connectionState"], "Connected");
    }
}
