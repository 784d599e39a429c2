// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Push-channel client session.
//!
//! Each WebSocket client becomes one relay subscriber. A writer task turns
//! relayed records into [`PushMessage`] text frames; every frame write is
//! bounded by the relay's send timeout, and a client that misses it is
//! disconnected. Incoming frames are drained and ignored.

use crate::protocol::PushMessage;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use pnplink::{RelayRecord, SubscriberId, TelemetryRelay};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Why a writer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// The relay dropped the subscription (slow consumer or relay stopped).
    RelayClosed,
    /// The socket rejected a frame.
    SendFailed,
    /// A frame write exceeded the send timeout.
    TimedOut,
}

/// A WebSocket push-channel client.
pub struct PushSession {
    relay: TelemetryRelay,
    session_id: String,
}

impl PushSession {
    pub fn new(relay: TelemetryRelay) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        info!("[{}] New push session", session_id);
        Self { relay, session_id }
    }

    /// Run until the client leaves or its writer stops.
    pub async fn run(self, socket: WebSocket) {
        let (ws_tx, mut ws_rx) = socket.split();
        let (subscriber, rx) = self.relay.subscribers().subscribe();
        debug!("[{}] Subscribed as {}", self.session_id, subscriber);

        let send_timeout = self.relay.config().send_timeout;
        let session_id = self.session_id.clone();
        let mut writer = tokio::spawn(async move {
            let exit = forward(rx, ws_tx, send_timeout).await;
            debug!("[{}] Writer stopped: {:?}", session_id, exit);
            exit
        });

        loop {
            tokio::select! {
                _ = &mut writer => break,
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("[{}] Client closed connection", self.session_id);
                        break;
                    }
                    Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                        debug!("[{}] Ignoring inbound frame", self.session_id);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("[{}] WebSocket error: {}", self.session_id, e);
                        break;
                    }
                },
            }
        }

        self.cleanup(subscriber);
        writer.abort();
        info!("[{}] Session ended", self.session_id);
    }

    fn cleanup(&self, subscriber: SubscriberId) {
        self.relay.subscribers().unsubscribe(subscriber);
    }
}

/// Write relayed records to `sink` until the subscription ends or a write
/// fails or times out.
pub async fn forward<S>(
    mut rx: mpsc::Receiver<Arc<RelayRecord>>,
    mut sink: S,
    send_timeout: Duration,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
{
    while let Some(record) = rx.recv().await {
        let text = match serde_json::to_string(&PushMessage::from(record.as_ref())) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize push message: {}", e);
                continue;
            }
        };

        match tokio::time::timeout(send_timeout, sink.send(Message::Text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return WriterExit::SendFailed,
            Err(_) => {
                warn!(timeout_ms = send_timeout.as_millis() as u64, "Push client too slow, disconnecting");
                return WriterExit::TimedOut;
            }
        }
    }
    WriterExit::RelayClosed
}
