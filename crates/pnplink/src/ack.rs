// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Desired-property acknowledgment state machine.
//!
//! Every desired update for a (component, property) pair is answered with a
//! sequence of reported-property acks:
//!
//! ```text
//!   receive(v) ──► Pending(v) ──┬── handler ok ─────────► Completed(v)
//!                               └── empty / malformed ──► Invalid(v)
//! ```
//!
//! The state per pair is last-writer-wins on the service-assigned version:
//! an ack whose version is lower than the latest recorded one is dropped.
//! [`transition`] is the pure step function; [`AckTracker`] keeps one active
//! [`AckRecord`] per pair and applies it.

use crate::error::StaleVersion;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

/// Description sent with the `Pending` ack.
pub const DESC_PENDING: &str = "update in progress";
/// Description sent with the `Completed` ack.
pub const DESC_COMPLETED: &str = "update complete";
/// Description sent with the `Invalid` ack.
pub const DESC_INVALID: &str = "invalid, empty value";
/// Description sent with the `NotImplemented` ack.
pub const DESC_NOT_IMPLEMENTED: &str = "not implemented";

/// Ack status codes (HTTP-like, as expected by the service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckStatus {
    Completed,
    Pending,
    Invalid,
    NotImplemented,
}

impl AckStatus {
    /// Wire status code (`ac`).
    pub const fn code(self) -> u16 {
        match self {
            Self::Completed => 200,
            Self::Pending => 202,
            Self::Invalid => 400,
            Self::NotImplemented => 404,
        }
    }
}

/// (component, property) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub component: String,
    pub property: String,
}

impl PropertyKey {
    pub fn new(component: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            property: property.into(),
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.property)
    }
}

/// One in-flight or completed desired-property update.
#[derive(Debug, Clone, PartialEq)]
pub struct AckRecord {
    pub component: String,
    pub property: String,
    pub value: Value,
    pub version: i64,
    pub status: AckStatus,
    pub description: String,
}

impl AckRecord {
    pub fn new(
        key: &PropertyKey,
        value: Value,
        version: i64,
        status: AckStatus,
        description: impl Into<String>,
    ) -> Self {
        Self {
            component: key.component.clone(),
            property: key.property.clone(),
            value,
            version,
            status,
            description: description.into(),
        }
    }

    pub fn key(&self) -> PropertyKey {
        PropertyKey::new(self.component.clone(), self.property.clone())
    }
}

/// Terminal outcome for a pending update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Completed,
    Invalid,
}

impl Resolution {
    fn status(self) -> AckStatus {
        match self {
            Self::Completed => AckStatus::Completed,
            Self::Invalid => AckStatus::Invalid,
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Completed => DESC_COMPLETED,
            Self::Invalid => DESC_INVALID,
        }
    }
}

/// Input to [`transition`].
#[derive(Debug, Clone)]
pub enum AckEvent {
    /// A desired value arrived with the given version.
    Received { value: Value, version: i64 },
    /// The pending update for `version` reached a terminal state.
    Resolved { version: i64, resolution: Resolution },
    /// No handler exists for the property.
    Unhandled { value: Value, version: i64 },
}

/// Pure step: given the active record of a pair and an event, return the
/// record to store and emit. A [`StaleVersion`] means the event is dropped.
pub fn transition(
    key: &PropertyKey,
    current: Option<&AckRecord>,
    event: AckEvent,
) -> Result<AckRecord, StaleVersion> {
    let latest = current.map(|r| r.version);

    match event {
        AckEvent::Received { value, version } => {
            reject_stale(latest, version)?;
            Ok(AckRecord::new(
                key,
                value,
                version,
                AckStatus::Pending,
                DESC_PENDING,
            ))
        }
        AckEvent::Unhandled { value, version } => {
            reject_stale(latest, version)?;
            Ok(AckRecord::new(
                key,
                value,
                version,
                AckStatus::NotImplemented,
                DESC_NOT_IMPLEMENTED,
            ))
        }
        AckEvent::Resolved {
            version,
            resolution,
        } => match current {
            Some(record) if record.version == version => {
                let mut next = record.clone();
                next.status = resolution.status();
                next.description = resolution.description().to_string();
                Ok(next)
            }
            // Superseded (or reset) while the handler ran.
            _ => Err(StaleVersion {
                received: version,
                latest: latest.unwrap_or(i64::MIN),
            }),
        },
    }
}

fn reject_stale(latest: Option<i64>, version: i64) -> Result<(), StaleVersion> {
    match latest {
        Some(latest) if version < latest => Err(StaleVersion {
            received: version,
            latest,
        }),
        _ => Ok(()),
    }
}

/// Active ack record per (component, property).
#[derive(Debug, Default)]
pub struct AckTracker {
    records: HashMap<PropertyKey, AckRecord>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `event` to `key`; returns the ack to send, `None` if stale.
    pub fn apply(&mut self, key: &PropertyKey, event: AckEvent) -> Option<AckRecord> {
        match transition(key, self.records.get(key), event) {
            Ok(record) => {
                self.records.insert(key.clone(), record.clone());
                Some(record)
            }
            Err(stale) => {
                trace!(%key, received = stale.received, latest = stale.latest, "Dropping stale ack");
                None
            }
        }
    }

    /// New desired value: the `Pending` ack to send first.
    pub fn receive(&mut self, key: &PropertyKey, value: Value, version: i64) -> Option<AckRecord> {
        self.apply(key, AckEvent::Received { value, version })
    }

    /// Terminal ack for the pending update `version`.
    pub fn resolve(
        &mut self,
        key: &PropertyKey,
        version: i64,
        resolution: Resolution,
    ) -> Option<AckRecord> {
        self.apply(
            key,
            AckEvent::Resolved {
                version,
                resolution,
            },
        )
    }

    /// `NotImplemented` ack for a property nobody handles.
    pub fn unhandled(&mut self, key: &PropertyKey, value: Value, version: i64) -> Option<AckRecord> {
        self.apply(key, AckEvent::Unhandled { value, version })
    }

    /// Record an externally produced ack, last-writer-wins on version.
    pub fn record(&mut self, ack: AckRecord) -> Result<(), StaleVersion> {
        let key = ack.key();
        if let Some(existing) = self.records.get(&key) {
            if ack.version < existing.version {
                trace!(%key, received = ack.version, latest = existing.version, "Dropping stale ack");
                return Err(StaleVersion {
                    received: ack.version,
                    latest: existing.version,
                });
            }
        }
        self.records.insert(key, ack);
        Ok(())
    }

    /// Forget the pair; the next update starts fresh.
    pub fn reset(&mut self, key: &PropertyKey) {
        self.records.remove(key);
    }

    pub fn get(&self, key: &PropertyKey) -> Option<&AckRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
