// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![deny(unsafe_code)]

//! CONTEXT: Host side of the DSP bridge shared-memory transport
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module; tests/transport.rs (simulated DSP), tests/properties.rs (proptest)
//!
//! PUBLIC API:
//! - `TransportBuilder` / `Transport`: image load, interrupt entry, deferred and power bodies,
//!   channel and message client calls, reload after reset
//! - `Workers`: host threads that run the deferred and power bodies on demand
//! - `BridgeConfig`: TOML-loadable tunables
//! - `SymbolTable` / `StaticSymbols`: image symbol lookup
//! - `ClientResources`: per-client release of channels and destinations
//! - `sim`: coprocessor-side protocol model for tests and `bridge-sim`
//!
//! DEPENDENCIES:
//! - bridge-hal: Bus / Mailbox / InterruptSource / MmuMapper seams
//! - bridge-sync: SPSC rings and the deferred-run spin gate
//! - parking_lot: client-list locks and message condvars
//! - thiserror, log, serde + toml, bitflags
//!
//! NOTE:
//! - Interrupt context only touches atomics and the SPSC rings.
//! - No lock is held across a copy to or from the shared window.

pub mod chnl;
pub mod config;
pub mod device;
pub mod error;
pub mod isr;
pub mod layout;
pub mod mapper;
pub mod msg;
pub mod power;
pub mod resources;
pub mod sim;
pub mod stats;
pub mod symbols;
pub mod trace;
pub mod transport;
pub mod workers;

pub use chnl::{ChannelId, ChannelNotify, ChannelState, Completion, CompletionStatus, Direction};
pub use config::{BridgeConfig, PowerOverflow, MAX_CHANNELS};
pub use device::DeviceStatus;
pub use error::{Error, Result};
pub use isr::{FaultSink, IrqOutcome};
pub use mapper::{HostWindow, SharedRegions};
pub use msg::{DspMsg, ExitNotify, MsgQueue, MsgQueueId, Wait, MSG_EXIT_ACK};
pub use power::{PowerControl, PowerRequest};
pub use resources::{ClientResources, Handle, Resource, ResourceArena};
pub use stats::StatsSnapshot;
pub use symbols::{StaticSymbols, SymbolTable};
pub use transport::{SharedBus, Transport, TransportBuilder};
pub use workers::Workers;
