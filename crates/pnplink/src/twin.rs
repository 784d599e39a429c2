// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Twin document sections (desired / reported).
//!
//! A section is a JSON object plus a `$version` counter. Patches follow JSON
//! merge-patch rules: objects merge recursively, `null` deletes a key,
//! anything else replaces.

use crate::codec::VERSION_KEY;
use serde_json::{Map, Value};

/// One versioned properties section.
#[derive(Debug, Clone, PartialEq)]
pub struct TwinSection {
    properties: Map<String, Value>,
    version: i64,
}

impl Default for TwinSection {
    fn default() -> Self {
        Self {
            properties: Map::new(),
            version: 1,
        }
    }
}

impl TwinSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Merge `patch` and bump the version; returns the new version.
    pub fn apply(&mut self, patch: &Value) -> i64 {
        if let Value::Object(fields) = patch {
            for (key, value) in fields {
                if key == VERSION_KEY {
                    continue;
                }
                merge_field(&mut self.properties, key, value);
            }
        }
        self.version += 1;
        self.version
    }

    /// Section as a JSON object including `$version`.
    pub fn to_value(&self) -> Value {
        let mut out = self.properties.clone();
        out.insert(VERSION_KEY.to_string(), Value::from(self.version));
        Value::Object(out)
    }
}

/// JSON merge-patch of `patch` into `target`.
fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                for (key, value) in fields {
                    merge_field(map, key, value);
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn merge_field(map: &mut Map<String, Value>, key: &str, value: &Value) {
    match value {
        Value::Null => {
            map.remove(key);
        }
        Value::Object(_) => {
            let slot = map.entry(key.to_string()).or_insert(Value::Null);
            merge_patch(slot, value);
        }
        other => {
            map.insert(key.to_string(), other.clone());
        }
    }
}

/// Patch with `$version` stamped in, as delivered to devices.
pub fn versioned_patch(patch: &Value, version: i64) -> Value {
    let mut out = patch.as_object().cloned().unwrap_or_default();
    out.insert(VERSION_KEY.to_string(), Value::from(version));
    Value::Object(out)
}
