// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion-log boundary: the partitioned log the service re-emits device
//! telemetry on.

use crate::error::RelayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::BTreeMap;

/// One record read from the ingestion log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Decoded body; non-JSON bodies arrive as a JSON string.
    pub body: Value,
    /// Time the service enqueued the record, when known.
    pub enqueued_time: Option<DateTime<Utc>>,
    /// Originating device, when known.
    pub device_id: Option<String>,
    /// Application properties (e.g. `$.sub`).
    pub properties: BTreeMap<String, String>,
}

impl LogRecord {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            enqueued_time: None,
            device_id: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_enqueued_time(mut self, time: DateTime<Utc>) -> Self {
        self.enqueued_time = Some(time);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Decode a raw body: JSON when it parses, a string otherwise.
    pub fn decode_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// Consumer side of the ingestion log.
#[async_trait]
pub trait IngestionLog: Send + Sync {
    /// Attach as `consumer_group` and stream records from now on.
    async fn subscribe(
        &self,
        consumer_group: &str,
    ) -> Result<BoxStream<'static, LogRecord>, RelayError>;
}
