// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulated thermostats on the in-process hub.
//!
//! Each device exposes a `thermostat` component: a writable
//! `targetTemperature`, a reported `currentTemperature`, periodic
//! `{"temperature": t}` telemetry drifting toward the target, and a `reset`
//! command.

use parking_lot::Mutex;
use pnplink::memory::MemoryHub;
use pnplink::{CommandResponse, Component, Device, PnpError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const COMPONENT: &str = "thermostat";
pub const MODEL_ID: &str = "dtmi:com:example:Thermostat;1";
pub const INITIAL_TEMPERATURE: f64 = 21.0;

/// Largest change per telemetry tick.
const MAX_STEP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ThermostatState {
    current: f64,
    target: f64,
    /// Target not yet reported back.
    target_dirty: bool,
}

impl Default for ThermostatState {
    fn default() -> Self {
        Self {
            current: INITIAL_TEMPERATURE,
            target: INITIAL_TEMPERATURE,
            target_dirty: true,
        }
    }
}

/// Move `current` toward `target` by at most `step`.
pub fn drift(current: f64, target: f64, step: f64) -> f64 {
    let delta = target - current;
    if delta.abs() <= step {
        target
    } else {
        current + step.copysign(delta)
    }
}

/// Device id of the `index`-th simulated thermostat.
pub fn device_id(index: usize) -> String {
    format!("thermostat-{}", index + 1)
}

/// Start `count` thermostats; each runs until its task is aborted.
pub async fn spawn_thermostats(
    hub: &MemoryHub,
    count: usize,
    interval: Duration,
) -> Result<Vec<JoinHandle<()>>, PnpError> {
    let mut tasks = Vec::with_capacity(count);
    for index in 0..count {
        let id = device_id(index);
        hub.set_model_id(&id, MODEL_ID);
        let device = Device::connect(hub.device_transport(&id)).await?;
        let thermostat = device.component(COMPONENT)?;

        let state = Arc::new(Mutex::new(ThermostatState::default()));
        install_handlers(&thermostat, &state).await?;

        if let Some(target) = thermostat
            .read_desired_property_as::<f64>("targetTemperature")
            .await?
        {
            let mut s = state.lock();
            s.target = target;
            s.target_dirty = true;
        }

        info!(device_id = %id, "Simulated thermostat online");
        tasks.push(tokio::spawn(run(device, thermostat, state, interval)));
    }
    Ok(tasks)
}

async fn install_handlers(
    thermostat: &Component,
    state: &Arc<Mutex<ThermostatState>>,
) -> Result<(), PnpError> {
    let on_target = state.clone();
    thermostat.subscribe_desired_property("targetTemperature", move |target: f64| {
        let mut s = on_target.lock();
        s.target = target;
        s.target_dirty = true;
        debug!(target, "Target temperature received");
        Ok(())
    });

    let on_reset = state.clone();
    thermostat
        .register_command("reset", move |_payload| {
            let state = on_reset.clone();
            async move {
                let current = {
                    let mut s = state.lock();
                    s.current = INITIAL_TEMPERATURE;
                    s.current
                };
                CommandResponse::ok(json!({"currentTemperature": current}))
            }
        })
        .await?;
    Ok(())
}

async fn run(
    device: Device,
    thermostat: Component,
    state: Arc<Mutex<ThermostatState>>,
    interval: Duration,
) {
    // Dropping the device would end the session.
    let _device = device;
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let (current, report_target) = {
            let mut s = state.lock();
            s.current = drift(s.current, s.target, MAX_STEP);
            let report = s.target_dirty.then_some(s.target);
            s.target_dirty = false;
            (s.current, report)
        };

        if let Err(e) = thermostat
            .send_telemetry_json(&json!({"temperature": current}))
            .await
        {
            warn!(component = thermostat.name(), "Telemetry failed: {}", e);
            continue;
        }
        if let Err(e) = thermostat.report_property("currentTemperature", &current).await {
            warn!(component = thermostat.name(), "Report failed: {}", e);
        }
        if let Some(target) = report_target {
            if let Err(e) = thermostat.report_property("targetTemperature", &target).await {
                warn!(component = thermostat.name(), "Report failed: {}", e);
            }
        }
    }
}
