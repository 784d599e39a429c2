// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway HTTP API integration tests
//!
//! Serves the router on an ephemeral port backed by the in-process hub and
//! drives it with an HTTP client and a WebSocket client.

use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use pnplink::memory::MemoryHub;
use pnplink::relay::RelayConfig;
use pnplink::{CommandResponse, Device, LogRecord, SharedConnection, TelemetryRelay};
use pnplink_gateway::{build_router, AppState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{self, Message};

const WAIT: Duration = Duration::from_secs(2);

struct TestGateway {
    addr: SocketAddr,
    base: String,
    hub: MemoryHub,
    state: Arc<AppState>,
    client: reqwest::Client,
}

impl TestGateway {
    async fn start(connection: SharedConnection) -> Self {
        Self::with_max_clients(connection, 4).await
    }

    async fn with_max_clients(connection: SharedConnection, max_clients: usize) -> Self {
        let hub = MemoryHub::new("hub.local");
        let relay = TelemetryRelay::new(RelayConfig::default());
        relay
            .start_broadcast(Arc::new(hub.clone()), "$Default")
            .await
            .unwrap();
        let state = Arc::new(AppState::new(
            connection,
            Arc::new(hub.clone()),
            relay,
            max_clients,
        ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            base: format!("http://{}", addr),
            hub,
            state,
            client: reqwest::Client::new(),
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Wait until exactly `clients` push clients hold a slot and a
    /// subscription.
    async fn wait_for_clients(&self, clients: usize) {
        tokio::time::timeout(WAIT, async {
            loop {
                if self.state.client_count().await == clients
                    && self.state.relay().subscribers().len() == clients
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("push clients never reached {}", clients));
    }

    async fn configured() -> Self {
        let gateway = Self::start(SharedConnection::default()).await;
        gateway.hub_connection().await;
        gateway
    }

    async fn hub_connection(&self) {
        let cs = self.hub.connection_string();
        let label: String = self
            .client
            .post(format!("{}/api/connection-string", self.base))
            .json(&json!({"connectionstring": cs.as_str()}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(label, "hub.local");
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_connection_string_lifecycle() {
    let gw = TestGateway::start(SharedConnection::default()).await;

    let label: String = gw.get("/api/connection-string").await.json().await.unwrap();
    assert_eq!(label, "not configured");

    let devices: Value = gw.get("/api/getDevices").await.json().await.unwrap();
    assert_eq!(devices, json!({}));

    gw.hub_connection().await;
    let label: String = gw.get("/api/connection-string").await.json().await.unwrap();
    assert_eq!(label, "hub.local");

    let resp = gw
        .post("/api/connection-string", json!({"connectionstring": "nonsense"}))
        .await;
    assert_eq!(resp.status(), 400);
    // A rejected update leaves the previous setting in place.
    let label: String = gw.get("/api/connection-string").await.json().await.unwrap();
    assert_eq!(label, "hub.local");

    let label: String = gw
        .post("/api/connection-string", json!({"connectionstring": ""}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(label, "not configured");
}

#[tokio::test]
async fn test_unconfigured_twin_request_fails() {
    let gw = TestGateway::start(SharedConnection::default()).await;
    let resp = gw.get("/api/getDeviceTwin?deviceId=dev1").await;
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 503);
}

#[tokio::test]
async fn test_foreign_hub_is_unauthorized() {
    let gw = TestGateway::start(SharedConnection::default()).await;
    gw.post(
        "/api/connection-string",
        json!({"connectionstring": "HostName=other.example.net;SharedAccessKeyName=o;SharedAccessKey=aw=="}),
    )
    .await;
    assert_eq!(gw.get("/api/getDevices").await.status(), 401);
}

#[tokio::test]
async fn test_devices_twin_and_model_id() {
    let gw = TestGateway::configured().await;
    gw.hub.set_model_id("dev1", "dtmi:com:example:Thermostat;1");
    let _device = Device::connect(gw.hub.device_transport("dev1")).await.unwrap();

    let devices: Value = gw.get("/api/getDevices").await.json().await.unwrap();
    assert_eq!(devices[0]["deviceId"], "dev1");
    assert_eq!(devices[0]["connectionState"], "Connected");

    let twin: Value = gw
        .get("/api/getDeviceTwin?deviceId=dev1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(twin["deviceId"], "dev1");
    assert!(twin["properties"]["desired"]["$version"].is_number());

    let model: Value = gw
        .get("/api/getModelId?deviceId=dev1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(model, "dtmi:com:example:Thermostat;1");

    assert_eq!(gw.get("/api/getDeviceTwin?deviceId=ghost").await.status(), 404);
}

#[tokio::test]
async fn test_update_twin_acks_through_device() {
    let gw = TestGateway::configured().await;
    let device = Device::connect(gw.hub.device_transport("dev1")).await.unwrap();
    let thermostat = device.component("thermostat").unwrap();
    thermostat.subscribe_desired_property("targetTemperature", |_: f64| Ok(()));

    let twin: Value = gw
        .post(
            "/api/updateDeviceTwin",
            json!({
                "deviceId": "dev1",
                "componentName": "thermostat",
                "propertyName": "targetTemperature",
                "propertyValue": 72.5
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(twin["properties"]["desired"]["thermostat"]["targetTemperature"], 72.5);

    let acked = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        loop {
            let twin: Value = gw
                .get("/api/getDeviceTwin?deviceId=dev1")
                .await
                .json()
                .await
                .unwrap();
            if twin["properties"]["reported"]["thermostat"]["targetTemperature"]["ac"] == 200 {
                return twin;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        acked["properties"]["reported"]["thermostat"]["targetTemperature"]["ad"],
        "update complete"
    );
    assert_eq!(acked["properties"]["reported"]["thermostat"]["__t"], "c");
}

#[tokio::test]
async fn test_invoke_component_and_root_commands() {
    let gw = TestGateway::configured().await;
    let device = Device::connect(gw.hub.device_transport("dev1")).await.unwrap();
    let thermostat = device.component("thermostat").unwrap();
    thermostat
        .register_command("reset", |payload| async move {
            CommandResponse::ok(json!({"reset": payload}))
        })
        .await
        .unwrap();

    let result: Value = gw
        .post(
            "/api/invokeCommand",
            json!({
                "deviceId": "dev1",
                "componentName": "thermostat",
                "commandName": "reset",
                "payload": {"to": 20}
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(result, json!({"status": 200, "payload": {"reset": {"to": 20}}}));

    let resp = gw
        .post(
            "/api/invokeCommand",
            json!({"deviceId": "dev1", "commandName": "reset"}),
        )
        .await;
    assert_eq!(resp.status(), 404);

    let resp = gw
        .post("/api/invokeCommand", json!({"deviceId": "", "commandName": "x"}))
        .await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_health() {
    let gw = TestGateway::start(SharedConnection::default()).await;
    let health: Value = gw.get("/health").await.json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["configured"], false);
    assert_eq!(health["max_clients"], 4);
    assert_eq!(health["relay"]["records_relayed"], 0);
}

#[tokio::test]
async fn test_push_channel_delivers_records_and_releases_slot() {
    let gw = TestGateway::start(SharedConnection::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(gw.ws_url()).await.unwrap();
    gw.wait_for_clients(1).await;

    let enqueued = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    gw.hub.publish(
        LogRecord::new(json!({"temperature": 21.5}))
            .with_device("thermostat-1")
            .with_enqueued_time(enqueued),
    );

    let frame = tokio::time::timeout(WAIT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {:?}", frame);
    };
    let message: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        message,
        json!({
            "IotData": {"temperature": 21.5},
            "MessageDate": "2024-05-01T10:00:00.000Z",
            "DeviceId": "thermostat-1"
        })
    );

    ws.close(None).await.unwrap();
    gw.wait_for_clients(0).await;
    assert_eq!(gw.state.relay().stats().deliveries, 1);
}

#[tokio::test]
async fn test_push_channel_rejects_clients_over_limit() {
    let gw = TestGateway::with_max_clients(SharedConnection::default(), 1).await;
    let (mut first, _) = tokio_tungstenite::connect_async(gw.ws_url()).await.unwrap();
    gw.wait_for_clients(1).await;

    match tokio_tungstenite::connect_async(gw.ws_url()).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 503),
        other => panic!("expected 503 rejection, got {:?}", other.map(|_| ())),
    }

    first.close(None).await.unwrap();
    gw.wait_for_clients(0).await;

    let (mut second, _) = tokio_tungstenite::connect_async(gw.ws_url()).await.unwrap();
    gw.wait_for_clients(1).await;
    second.close(None).await.unwrap();
}
