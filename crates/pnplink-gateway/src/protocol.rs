// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire types for the HTTP API and the push channel.

use pnplink::RelayRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Push-channel message, one per relayed telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushMessage {
    pub iot_data: Value,
    /// RFC 3339 UTC.
    pub message_date: String,
    pub device_id: Option<String>,
}

impl From<&RelayRecord> for PushMessage {
    fn from(record: &RelayRecord) -> Self {
        Self {
            iot_data: record.payload.clone(),
            message_date: record.timestamp_rfc3339(),
            device_id: record.origin_id.clone(),
        }
    }
}

/// Body of `POST /api/connection-string`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionStringRequest {
    #[serde(default)]
    pub connectionstring: Option<String>,
}

/// Query of the per-device `GET` endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceQuery {
    pub device_id: String,
}

/// Body of `POST /api/updateDeviceTwin`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTwinRequest {
    pub device_id: String,
    #[serde(default)]
    pub component_name: Option<String>,
    pub property_name: String,
    #[serde(default)]
    pub property_value: Value,
}

/// Body of `POST /api/invokeCommand`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeCommandRequest {
    pub device_id: String,
    #[serde(default)]
    pub component_name: Option<String>,
    pub command_name: String,
    #[serde(default)]
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_push_message_field_names() {
        let record = RelayRecord {
            payload: json!({"temperature": 21.5}),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            origin_id: Some("thermostat-1".into()),
        };
        let value = serde_json::to_value(PushMessage::from(&record)).unwrap();
        assert_eq!(
            value,
            json!({
                "IotData": {"temperature": 21.5},
                "MessageDate": "2024-05-01T10:00:00.000Z",
                "DeviceId": "thermostat-1"
            })
        );
    }

    #[test]
    fn test_parse_update_twin_with_component() {
        let req: UpdateTwinRequest = serde_json::from_value(json!({
            "deviceId": "dev1",
            "componentName": "thermostat",
            "propertyName": "targetTemperature",
            "propertyValue": 70
        }))
        .unwrap();
        assert_eq!(req.component_name.as_deref(), Some("thermostat"));
        assert_eq!(req.property_value, json!(70));
    }

    #[test]
    fn test_parse_invoke_without_payload() {
        let req: InvokeCommandRequest = serde_json::from_value(json!({
            "deviceId": "dev1",
            "commandName": "reboot"
        }))
        .unwrap();
        assert!(req.component_name.is_none());
        assert_eq!(req.payload, Value::Null);
    }
}
