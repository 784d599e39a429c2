// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry fan-out.
//!
//! [`TelemetryRelay`] consumes the ingestion log under one consumer group and
//! hands every record to a callback, typically [`TelemetryRelay::publish`],
//! which pushes it to all live subscribers.
//!
//! # Delivery
//!
//! - Each subscriber sees records in ingestion order.
//! - There is no ordering across subscribers and no backfill: a subscriber
//!   only sees records read after it joined.
//! - Delivery is a non-blocking `try_send`. A subscriber whose queue is full
//!   or closed is dropped on the spot and never retried; the others are
//!   unaffected.

use crate::error::RelayError;
use crate::ingest::{IngestionLog, LogRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Default bound on one network send to a subscriber.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Queue depth of each subscriber channel.
    pub subscriber_buffer: usize,
    /// Upper bound for a single write to a subscriber's connection.
    pub send_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// One relayed telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayRecord {
    pub payload: Value,
    /// Enqueue time from the log, or the relay's receive time.
    pub timestamp: DateTime<Utc>,
    /// Originating device, when the log carries it.
    pub origin_id: Option<String>,
}

impl RelayRecord {
    /// Build from a log record, defaulting the timestamp to `received_at`.
    pub fn from_log(record: LogRecord, received_at: DateTime<Utc>) -> Self {
        Self {
            payload: record.body,
            timestamp: record.enqueued_time.unwrap_or(received_at),
            origin_id: record.device_id,
        }
    }

    /// Timestamp as an RFC 3339 UTC string with millisecond precision.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that accepted the message.
    pub delivered: usize,
    /// Subscribers removed because their queue was full or closed.
    pub dropped: Vec<SubscriberId>,
}

/// Concurrent set of subscriber channels.
pub struct SubscriberSet<T> {
    subscribers: DashMap<SubscriberId, mpsc::Sender<T>>,
    buffer: usize,
}

impl<T: Clone> SubscriberSet<T> {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Add a subscriber with a fresh bounded queue.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        (self.insert(tx), rx)
    }

    /// Add an existing sender as a subscriber.
    pub fn insert(&self, tx: mpsc::Sender<T>) -> SubscriberId {
        let id = SubscriberId::new();
        self.subscribers.insert(id, tx);
        debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber added");
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber removed");
        }
        removed
    }

    /// Offer `message` to every subscriber without waiting.
    ///
    /// Failing subscribers are collected during iteration and removed
    /// afterwards.
    pub fn broadcast(&self, message: &T) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => failed.push((*entry.key(), "queue full")),
                Err(TrySendError::Closed(_)) => failed.push((*entry.key(), "closed")),
            }
        }

        for (id, reason) in failed {
            if self.subscribers.remove(&id).is_some() {
                warn!(subscriber = %id, reason, "Dropping subscriber");
                report.dropped.push(id);
            }
        }

        report
    }

    pub fn clear(&self) {
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    records_relayed: AtomicU64,
    deliveries: AtomicU64,
    dropped_subscribers: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RelayStatsSnapshot {
    pub records_relayed: u64,
    pub deliveries: u64,
    pub dropped_subscribers: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            records_relayed: self.records_relayed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped_subscribers: self.dropped_subscribers.load(Ordering::Relaxed),
        }
    }
}

struct RelayInner {
    config: RelayConfig,
    subscribers: SubscriberSet<Arc<RelayRecord>>,
    stats: RelayStats,
    running: Mutex<Option<CancellationToken>>,
}

impl RelayInner {
    /// Mark the loop owning `token` as finished.
    ///
    /// [`TelemetryRelay::stop`] cancels the token it takes while holding the
    /// lock, so an uncancelled token is still the installed one.
    fn release(&self, token: &CancellationToken) {
        let mut running = self.running.lock();
        if !token.is_cancelled() {
            token.cancel();
            running.take();
        }
    }
}

/// Consumes the ingestion log and fans records out to subscribers.
#[derive(Clone)]
pub struct TelemetryRelay {
    inner: Arc<RelayInner>,
}

impl TelemetryRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                config,
                subscribers: SubscriberSet::new(config.subscriber_buffer),
                stats: RelayStats::default(),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn subscribers(&self) -> &SubscriberSet<Arc<RelayRecord>> {
        &self.inner.subscribers
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Broadcast one record to every subscriber.
    pub fn publish(&self, record: RelayRecord) -> BroadcastReport {
        let report = self.inner.subscribers.broadcast(&Arc::new(record));
        self.inner
            .stats
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.inner
            .stats
            .dropped_subscribers
            .fetch_add(report.dropped.len() as u64, Ordering::Relaxed);
        report
    }

    /// Attach to `log` as `consumer_group` and call `on_record` for every
    /// record read, until [`stop`](Self::stop) or the end of the log.
    pub async fn start<F>(
        &self,
        log: Arc<dyn IngestionLog>,
        consumer_group: &str,
        on_record: F,
    ) -> Result<JoinHandle<()>, RelayError>
    where
        F: Fn(RelayRecord) + Send + Sync + 'static,
    {
        let cancel = {
            let mut running = self.inner.running.lock();
            if running.is_some() {
                return Err(RelayError::AlreadyStarted);
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        let mut records = match log.subscribe(consumer_group).await {
            Ok(records) => records,
            Err(err) => {
                self.inner.release(&cancel);
                return Err(err);
            }
        };

        info!(consumer_group, "Telemetry relay started");
        let inner = self.inner.clone();
        let group = consumer_group.to_string();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(consumer_group = %group, "Relay loop cancelled");
                        break;
                    }
                    next = records.next() => match next {
                        Some(record) => {
                            let record = RelayRecord::from_log(record, Utc::now());
                            trace!(origin = ?record.origin_id, "Relaying record");
                            inner.stats.records_relayed.fetch_add(1, Ordering::Relaxed);
                            on_record(record);
                        }
                        None => {
                            info!(consumer_group = %group, "Ingestion log ended");
                            inner.release(&cancel);
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// [`start`](Self::start) with [`publish`](Self::publish) as the callback.
    pub async fn start_broadcast(
        &self,
        log: Arc<dyn IngestionLog>,
        consumer_group: &str,
    ) -> Result<JoinHandle<()>, RelayError> {
        let relay = self.clone();
        self.start(log, consumer_group, move |record| {
            relay.publish(record);
        })
        .await
    }

    /// Cancel the consume loop and drop all subscribers.
    pub fn stop(&self) {
        {
            let mut running = self.inner.running.lock();
            if let Some(token) = running.take() {
                token.cancel();
                info!("Telemetry relay stopped");
            }
        }
        self.inner.subscribers.clear();
    }
}

impl fmt::Debug for TelemetryRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryRelay")
            .field("config", &self.inner.config)
            .field("subscribers", &self.inner.subscribers.len())
            .field("running", &self.is_running())
            .finish()
    }
}
