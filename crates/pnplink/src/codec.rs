// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Component-scoped property and command addressing.
//!
//! A property that belongs to a named component is written one level deeper
//! than a root-device property:
//!
//! ```json
//! { "thermostat": { "targetTemperature": 72.5 } }
//! ```
//!
//! Acks carry the component marker and the status block:
//!
//! ```json
//! { "thermostat": { "__t": "c",
//!     "targetTemperature": { "value": 72.5, "ac": 202, "av": 3, "ad": "update in progress" } } }
//! ```
//!
//! Commands addressed to a component travel as `"<component>*<command>"`.

use crate::ack::AckRecord;
use crate::error::{EncodingError, InvalidPropertyValue};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Marker key flagging an object as a component inside a twin document.
pub const COMPONENT_MARKER_KEY: &str = "__t";

/// Marker value paired with [`COMPONENT_MARKER_KEY`].
pub const COMPONENT_MARKER_VALUE: &str = "c";

/// Separator between component and command in a command wire name.
pub const COMMAND_SEPARATOR: char = '*';

/// Key holding the document version in a twin properties section.
pub const VERSION_KEY: &str = "$version";

/// Wrap `value` under `component` then `property`.
pub fn encode(component: &str, property: &str, value: Value) -> Value {
    let mut inner = Map::new();
    inner.insert(property.to_string(), value);

    let mut root = Map::new();
    root.insert(component.to_string(), Value::Object(inner));
    Value::Object(root)
}

/// Look up the value for (`component`, `property`).
///
/// Returns `Ok(None)` when the document carries no update for the pair.
/// Only a structurally broken document is an error.
pub fn decode(
    document: &Value,
    component: &str,
    property: &str,
) -> Result<Option<Value>, EncodingError> {
    let root = document
        .as_object()
        .ok_or(EncodingError::NotAnObject(kind(document)))?;

    let Some(entry) = root.get(component) else {
        return Ok(None);
    };

    let section = entry
        .as_object()
        .ok_or_else(|| EncodingError::ComponentNotAnObject {
            component: component.to_string(),
            found: kind(entry),
        })?;

    Ok(section.get(property).cloned())
}

/// Build the reported-property patch acknowledging `record`.
///
/// The component marker is always set; `ad` is omitted when the description
/// is empty.
pub fn encode_ack(record: &AckRecord) -> Value {
    let mut status = Map::new();
    status.insert("value".into(), record.value.clone());
    status.insert("ac".into(), Value::from(record.status.code()));
    status.insert("av".into(), Value::from(record.version));
    if !record.description.is_empty() {
        status.insert("ad".into(), Value::String(record.description.clone()));
    }

    let mut section = Map::new();
    section.insert(
        COMPONENT_MARKER_KEY.into(),
        Value::String(COMPONENT_MARKER_VALUE.into()),
    );
    section.insert(record.property.clone(), Value::Object(status));

    let mut root = Map::new();
    root.insert(record.component.clone(), Value::Object(section));
    Value::Object(root)
}

/// Property names of `component` present in `document`, skipping metadata keys.
pub fn component_properties(
    document: &Value,
    component: &str,
) -> Result<Vec<String>, EncodingError> {
    let root = document
        .as_object()
        .ok_or(EncodingError::NotAnObject(kind(document)))?;

    match root.get(component) {
        None => Ok(Vec::new()),
        Some(Value::Object(section)) => Ok(section
            .keys()
            .filter(|k| *k != COMPONENT_MARKER_KEY && !k.starts_with('$'))
            .cloned()
            .collect()),
        Some(other) => Err(EncodingError::ComponentNotAnObject {
            component: component.to_string(),
            found: kind(other),
        }),
    }
}

/// Decoded command wire name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTarget {
    /// `None` for root-device commands.
    pub component: Option<String>,
    pub command: String,
}

/// `"<component>*<command>"`.
pub fn join_command_name(component: &str, command: &str) -> String {
    format!("{}{}{}", component, COMMAND_SEPARATOR, command)
}

/// Split a command wire name on its first `*`.
pub fn split_command_name(wire_name: &str) -> CommandTarget {
    match wire_name.split_once(COMMAND_SEPARATOR) {
        Some((component, command)) => CommandTarget {
            component: Some(component.to_string()),
            command: command.to_string(),
        },
        None => CommandTarget {
            component: None,
            command: wire_name.to_string(),
        },
    }
}

/// `null` and `""` count as no value.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Coerce a desired value into the handler's type.
///
/// Services frequently deliver scalars as strings (`"72.5"`), so a string
/// that does not deserialize directly is parsed as JSON once more.
pub fn coerce<T: DeserializeOwned>(value: &Value) -> Result<T, InvalidPropertyValue> {
    if is_empty_value(value) {
        return Err(InvalidPropertyValue::Empty);
    }

    match T::deserialize(value) {
        Ok(v) => Ok(v),
        Err(first) => {
            if let Value::String(text) = value {
                if let Ok(v) = serde_json::from_str::<T>(text) {
                    return Ok(v);
                }
            }
            Err(InvalidPropertyValue::Coercion(first.to_string()))
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::AckStatus;
    use serde_json::json;

    #[test]
    fn encode_nests_under_component() {
        let doc = encode("thermostat", "targetTemperature", json!(72.5));
        assert_eq!(doc, json!({"thermostat": {"targetTemperature": 72.5}}));
    }

    #[test]
    fn decode_recovers_encoded_values() {
        let cases = [
            json!(72.5),
            json!("on"),
            json!({"nested": [1, 2, 3]}),
            json!(false),
        ];
        for value in cases {
            let doc = encode("sensor-1", "mode", value.clone());
            assert_eq!(decode(&doc, "sensor-1", "mode").unwrap(), Some(value));
        }
    }

    #[test]
    fn decode_absent_pair_is_none() {
        let doc = json!({"$version": 4, "thermostat": {"other": 1}});
        assert_eq!(decode(&doc, "thermostat", "targetTemperature").unwrap(), None);
        assert_eq!(decode(&doc, "fan", "speed").unwrap(), None);
    }

    #[test]
    fn decode_rejects_malformed_structure() {
        assert_eq!(
            decode(&json!([1, 2]), "c", "p"),
            Err(EncodingError::NotAnObject("an array"))
        );
        assert!(matches!(
            decode(&json!({"c": 5}), "c", "p"),
            Err(EncodingError::ComponentNotAnObject { .. })
        ));
    }

    #[test]
    fn ack_document_shape() {
        let record = AckRecord {
            component: "thermostat".into(),
            property: "targetTemperature".into(),
            value: json!(72.5),
            version: 3,
            status: AckStatus::Pending,
            description: "update in progress".into(),
        };
        assert_eq!(
            encode_ack(&record),
            json!({"thermostat": {"__t": "c", "targetTemperature": {
                "value": 72.5, "ac": 202, "av": 3, "ad": "update in progress"
            }}})
        );
    }

    #[test]
    fn ack_omits_empty_description() {
        let record = AckRecord {
            component: "c".into(),
            property: "p".into(),
            value: json!(1),
            version: 1,
            status: AckStatus::Completed,
            description: String::new(),
        };
        let doc = encode_ack(&record);
        assert!(doc["c"]["p"].get("ad").is_none());
        assert_eq!(doc["c"]["p"]["ac"], 200);
    }

    #[test]
    fn command_names_round_trip() {
        let wire = join_command_name("thermostat", "reboot");
        assert_eq!(wire, "thermostat*reboot");
        assert_eq!(
            split_command_name(&wire),
            CommandTarget {
                component: Some("thermostat".into()),
                command: "reboot".into()
            }
        );
    }

    #[test]
    fn command_split_uses_first_separator() {
        let target = split_command_name("a*b*c");
        assert_eq!(target.component.as_deref(), Some("a"));
        assert_eq!(target.command, "b*c");
    }

    #[test]
    fn command_without_separator_is_root() {
        let target = split_command_name("reboot");
        assert_eq!(target.component, None);
        assert_eq!(target.command, "reboot");
    }

    #[test]
    fn component_properties_skip_metadata() {
        let doc = json!({"thermostat": {"__t": "c", "$meta": 1, "a": 1, "b": 2}});
        let mut props = component_properties(&doc, "thermostat").unwrap();
        props.sort();
        assert_eq!(props, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn coerce_accepts_numbers_and_numeric_strings() {
        assert_eq!(coerce::<f64>(&json!(72.5)), Ok(72.5));
        assert_eq!(coerce::<f64>(&json!("72.5")), Ok(72.5));
        assert_eq!(coerce::<String>(&json!("eco")), Ok("eco".to_string()));
    }

    #[test]
    fn coerce_rejects_empty_and_mismatched() {
        assert_eq!(coerce::<f64>(&json!("")), Err(InvalidPropertyValue::Empty));
        assert_eq!(coerce::<f64>(&Value::Null), Err(InvalidPropertyValue::Empty));
        assert!(matches!(
            coerce::<f64>(&json!("warm")),
            Err(InvalidPropertyValue::Coercion(_))
        ));
    }
}
