// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service connection settings.
//!
//! - [`ConnectionString`]: parsed `Key=Value;...` service credentials.
//! - [`SharedConnection`]: reloadable holder. Readers take a snapshot once
//!   per request; writers swap the whole value atomically (`ArcSwap`), so a
//!   reader never observes a half-updated connection.

use arc_swap::ArcSwap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Connection string errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    #[error("Connection string is empty")]
    Empty,

    #[error("Malformed segment '{0}' (expected Key=Value)")]
    MalformedSegment(String),

    #[error("Missing required key '{0}'")]
    MissingKey(&'static str),
}

/// Parsed service connection string.
///
/// ```ignore
/// let cs: ConnectionString =
///     "HostName=hub.example.net;SharedAccessKeyName=owner;SharedAccessKey=abc=".parse()?;
/// assert_eq!(cs.host_name(), "hub.example.net");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    raw: String,
    host_name: String,
    shared_access_key_name: Option<String>,
    shared_access_key: Option<String>,
    device_id: Option<String>,
}

impl ConnectionString {
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Hub name as reported to operators (the `HostName` value).
    pub fn hub_name(&self) -> &str {
        &self.host_name
    }

    pub fn shared_access_key_name(&self) -> Option<&str> {
        self.shared_access_key_name.as_deref()
    }

    pub fn shared_access_key(&self) -> Option<&str> {
        self.shared_access_key.as_deref()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Service-level connection string from its parts.
    pub(crate) fn from_parts(host_name: &str, key_name: &str, key: &str) -> Self {
        Self {
            raw: format!("HostName={host_name};SharedAccessKeyName={key_name};SharedAccessKey={key}"),
            host_name: host_name.to_string(),
            shared_access_key_name: Some(key_name.to_string()),
            shared_access_key: Some(key.to_string()),
            device_id: None,
        }
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(ConnectionStringError::Empty);
        }

        let mut host_name = None;
        let mut key_name = None;
        let mut key = None;
        let mut device_id = None;

        for segment in raw.split(';').filter(|seg| !seg.trim().is_empty()) {
            // Keys are base64 and may contain '=': split on the first one only.
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedSegment(segment.to_string()))?;
            let value = value.trim().to_string();

            match name.trim().to_ascii_lowercase().as_str() {
                "hostname" => host_name = Some(value),
                "sharedaccesskeyname" => key_name = Some(value),
                "sharedaccesskey" => key = Some(value),
                "deviceid" => device_id = Some(value),
                _ => {}
            }
        }

        let host_name = host_name
            .filter(|h| !h.is_empty())
            .ok_or(ConnectionStringError::MissingKey("HostName"))?;

        Ok(Self {
            raw: raw.to_string(),
            host_name,
            shared_access_key_name: key_name,
            shared_access_key: key,
            device_id,
        })
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("shared_access_key", &self.shared_access_key.as_ref().map(|_| "<redacted>"))
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Reloadable connection setting shared by all request handlers.
#[derive(Clone, Default)]
pub struct SharedConnection {
    current: Arc<ArcSwap<Option<ConnectionString>>>,
}

impl SharedConnection {
    pub fn new(initial: Option<ConnectionString>) -> Self {
        Self {
            current: Arc::new(ArcSwap::new(Arc::new(initial))),
        }
    }

    /// Consistent view for the duration of one request.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Option<ConnectionString>> {
        self.current.load_full()
    }

    /// Replace the setting (`None` clears it).
    pub fn replace(&self, next: Option<ConnectionString>) {
        self.current.store(Arc::new(next));
    }

    pub fn is_configured(&self) -> bool {
        self.current.load().is_some()
    }
}

impl fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedConnection")
            .field(&*self.current.load_full())
            .finish()
    }
}
