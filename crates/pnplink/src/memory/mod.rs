// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Intra-process hub.
//!
//! [`MemoryHub`] plays the connectivity service for devices and operators
//! living in the same process: it implements [`Registry`](crate::registry::Registry)
//! and [`IngestionLog`](crate::ingest::IngestionLog), and hands out
//! [`MemoryTransport`]s implementing [`DeviceTransport`](crate::transport::DeviceTransport).
//!
//! Telemetry sent by a device lands on the hub's log; desired patches
//! submitted through the registry are pushed to the device; direct methods
//! are routed to the handlers the device registered.

mod hub;
mod transport;

pub use hub::MemoryHub;
pub use transport::MemoryTransport;
