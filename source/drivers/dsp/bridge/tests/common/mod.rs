// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared rig: a transport over a heap window with a simulated DSP on the
//! other side, recording mailbox, scripted interrupts and recording sinks.

#![allow(dead_code)]

use std::sync::Arc;

use bridge_hal::{HeapWindow, RecordingMapper};
use dsp_bridge::isr::MBX_PCPY_CLASS;
use dsp_bridge::sim::{RecordingMailbox, ScriptedInterrupts, SimDsp, SimImage};
use dsp_bridge::{BridgeConfig, FaultSink, IrqOutcome, PowerControl, PowerRequest, SharedBus, Transport, TransportBuilder};
use parking_lot::Mutex;

pub const HOST_PHYSICAL: u64 = 0x8000_0000;
pub const WINDOW_LEN: usize = 0x4000;

#[derive(Default)]
pub struct RecordingPower {
    pub requests: Mutex<Vec<PowerRequest>>,
}

impl PowerControl for RecordingPower {
    fn hibernate(&self) -> Result<(), String> {
        self.requests.lock().push(PowerRequest::HibernateEnable);
        Ok(())
    }

    fn set_operating_point(&self, index: u8) -> Result<(), String> {
        self.requests.lock().push(PowerRequest::OperatingPoint(index));
        Ok(())
    }

    fn clock_control(&self, code: u16) -> Result<(), String> {
        self.requests.lock().push(PowerRequest::ClockControl(code));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingFaults {
    pub statuses: Mutex<Vec<u16>>,
}

impl FaultSink for RecordingFaults {
    fn report(&self, status: u16) {
        self.statuses.lock().push(status);
    }
}

pub struct Rig {
    pub image: SimImage,
    pub transport: Arc<Transport>,
    pub dsp: Arc<SimDsp>,
    pub mailbox: Arc<RecordingMailbox>,
    pub irq: Arc<ScriptedInterrupts>,
    pub mmu: Arc<RecordingMapper>,
    pub power: Arc<RecordingPower>,
    pub faults: Arc<RecordingFaults>,
}

impl Rig {
    pub fn new(config: BridgeConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let image = SimImage::default();
        let window = Arc::new(HeapWindow::new(WINDOW_LEN));
        let bus: SharedBus = window;
        let mailbox = Arc::new(RecordingMailbox::new());
        let irq = Arc::new(ScriptedInterrupts::new(64));
        let mmu = Arc::new(RecordingMapper::new());
        let power = Arc::new(RecordingPower::default());
        let faults = Arc::new(RecordingFaults::default());
        let transport = TransportBuilder::new(config)
            .window(HOST_PHYSICAL, bus.clone())
            .mailbox(mailbox.clone())
            .interrupt_source(irq.clone())
            .mmu(mmu.clone())
            .power(power.clone())
            .faults(faults.clone())
            .build(&image.symbols())
            .expect("transport comes up");
        let dsp = Arc::new(SimDsp::new(bus, transport.regions()));
        Self { image, transport: Arc::new(transport), dsp, mailbox, irq, mmu, power, faults }
    }

    pub fn standard() -> Self {
        Self::new(BridgeConfig::default())
    }

    /// Raises an interrupt and lets the handler classify it.
    pub fn interrupt(&self, status: u16) -> IrqOutcome {
        self.irq.raise(status);
        self.transport.handle_interrupt()
    }

    /// A data-class doorbell from the DSP followed by one deferred run.
    pub fn signal(&self) {
        assert_eq!(self.interrupt(MBX_PCPY_CLASS), IrqOutcome::Deferred);
        self.transport.run_deferred();
    }
}
