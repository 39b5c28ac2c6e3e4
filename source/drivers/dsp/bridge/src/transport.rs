// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The bridge device: one value owning every piece of transport state.
//!
//! Three execution contexts touch a [`Transport`]:
//! - interrupt: [`Transport::handle_interrupt`], lock-free
//! - workers: [`Transport::run_deferred`] and [`Transport::run_power`]
//! - clients: the channel and message calls
//!
//! Built with [`TransportBuilder`], which loads the image layout, maps the
//! shared window and initialises the control blocks.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::Thread;

use bridge_hal::{Bus, InterruptSource, Mailbox, MmuMapper};
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::chnl::{
    ChannelId, ChannelLink, ChannelNotify, ChannelState, ChannelTransport, Completion, CompletionStatus, Direction,
};
use crate::config::BridgeConfig;
use crate::device::{DeviceState, DeviceStatus};
use crate::error::{Error, Result};
use crate::isr::{classify, is_fault, Dispatcher, FaultSink, IrqClass, IrqOutcome};
use crate::layout::{msg_ctrl, MsgRegion, MSG_CTRL_SIZE, SHM_CTRL_SIZE};
use crate::mapper::{map_shared_regions, HostWindow, SharedRegions};
use crate::msg::{DspMsg, ExitNotify, MsgLink, MsgManager, MsgQueue, MsgQueueId, Wait};
use crate::power::{PowerControl, PowerQueue};
use crate::stats::{add, bump, StatsSnapshot, TransportStats};
use crate::symbols::SymbolTable;
use crate::trace::TraceExtractor;

pub type SharedBus = Arc<dyn Bus + Send + Sync>;

/// Worker threads woken from interrupt context.
#[derive(Default)]
pub(crate) struct WorkKick {
    deferred: OnceLock<Thread>,
    power: OnceLock<Thread>,
}

impl WorkKick {
    pub(crate) fn attach(&self, deferred: Thread, power: Thread) -> bool {
        self.deferred.set(deferred).is_ok() && self.power.set(power).is_ok()
    }

    fn deferred(&self) {
        if let Some(thread) = self.deferred.get() {
            thread.unpark();
        }
    }

    fn power(&self) {
        if let Some(thread) = self.power.get() {
            thread.unpark();
        }
    }

    pub(crate) fn wake_all(&self) {
        self.deferred();
        self.power();
    }
}

struct NoPowerControl;

impl PowerControl for NoPowerControl {
    fn hibernate(&self) -> core::result::Result<(), String> {
        Err("no power control attached".into())
    }

    fn set_operating_point(&self, _index: u8) -> core::result::Result<(), String> {
        Err("no power control attached".into())
    }

    fn clock_control(&self, _code: u16) -> core::result::Result<(), String> {
        Err("no power control attached".into())
    }
}

struct LogFaults;

impl FaultSink for LogFaults {
    fn report(&self, status: u16) {
        error!("dsp-bridge: coprocessor exception {status:#06x}");
    }
}

pub struct TransportBuilder {
    config: BridgeConfig,
    window: Option<(u64, SharedBus)>,
    mailbox: Option<Arc<dyn Mailbox + Send + Sync>>,
    irq: Option<Arc<dyn InterruptSource + Send + Sync>>,
    mmu: Option<Arc<dyn MmuMapper + Send + Sync>>,
    power: Option<Arc<dyn PowerControl + Send + Sync>>,
    faults: Option<Arc<dyn FaultSink + Send + Sync>>,
}

impl TransportBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config, window: None, mailbox: None, irq: None, mmu: None, power: None, faults: None }
    }

    /// The reserved window: its host physical base and host-side access.
    pub fn window(mut self, host_physical: u64, bus: SharedBus) -> Self {
        self.window = Some((host_physical, bus));
        self
    }

    pub fn mailbox(mut self, mailbox: Arc<dyn Mailbox + Send + Sync>) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    pub fn interrupt_source(mut self, irq: Arc<dyn InterruptSource + Send + Sync>) -> Self {
        self.irq = Some(irq);
        self
    }

    pub fn mmu(mut self, mmu: Arc<dyn MmuMapper + Send + Sync>) -> Self {
        self.mmu = Some(mmu);
        self
    }

    pub fn power(mut self, power: Arc<dyn PowerControl + Send + Sync>) -> Self {
        self.power = Some(power);
        self
    }

    pub fn faults(mut self, faults: Arc<dyn FaultSink + Send + Sync>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Loads the image layout from `symbols` and brings the transport up.
    pub fn build(self, symbols: &dyn SymbolTable) -> Result<Transport> {
        let config = self.config;
        config.validate()?;
        let (host_physical, bus) = self.window.ok_or_else(|| missing("window"))?;
        let mailbox = self.mailbox.ok_or_else(|| missing("mailbox"))?;
        let irq = self.irq.ok_or_else(|| missing("interrupt source"))?;
        let mmu = self.mmu.ok_or_else(|| missing("mmu"))?;
        let power = self.power.unwrap_or_else(|| Arc::new(NoPowerControl));
        let faults = self.faults.unwrap_or_else(|| Arc::new(LogFaults));

        let window = HostWindow { host_physical, len: bus.len() };
        let regions = map_shared_regions(symbols, &window, &*mmu, &config)?;
        let device = Arc::new(DeviceState::new());
        let messages = config
            .messaging
            .then(|| Arc::new(MsgManager::new(config.max_queue_messages, device.clone())));

        let transport = Transport {
            channels: ChannelTransport::new(config.channels),
            messages,
            dispatcher: Dispatcher::new(config.deferred_queue_capacity),
            power_queue: PowerQueue::new(config.power_queue_capacity, config.power_overflow.into()),
            power_gate: Mutex::new(()),
            trace: Mutex::new(trace_for(&regions)),
            regions: RwLock::new(regions),
            window,
            device,
            lost_settled: AtomicBool::new(false),
            kick: WorkKick::default(),
            stats: TransportStats::default(),
            bus,
            mailbox,
            irq,
            mmu,
            power,
            faults,
            config,
        };
        transport.prepare_window(&regions);
        info!(
            "dsp-bridge: up: {} channels, slot {:#x} bytes, {} messages per batch",
            transport.config.channels, regions.channel.slot_size, regions.message.capacity
        );
        Ok(transport)
    }
}

fn missing(what: &str) -> Error {
    Error::Config(format!("transport builder: no {what} given"))
}

fn trace_for(regions: &SharedRegions) -> Option<TraceExtractor> {
    regions.trace.map(|region| TraceExtractor::new(region, regions.dsp_base, regions.word_size))
}

pub struct Transport {
    config: BridgeConfig,
    window: HostWindow,
    bus: SharedBus,
    mailbox: Arc<dyn Mailbox + Send + Sync>,
    irq: Arc<dyn InterruptSource + Send + Sync>,
    mmu: Arc<dyn MmuMapper + Send + Sync>,
    power: Arc<dyn PowerControl + Send + Sync>,
    faults: Arc<dyn FaultSink + Send + Sync>,
    regions: RwLock<SharedRegions>,
    channels: ChannelTransport,
    messages: Option<Arc<MsgManager>>,
    dispatcher: Dispatcher,
    power_queue: PowerQueue,
    power_gate: Mutex<()>,
    trace: Mutex<Option<TraceExtractor>>,
    device: Arc<DeviceState>,
    /// Whether the current loss has already failed outstanding requests.
    lost_settled: AtomicBool,
    pub(crate) kick: WorkKick,
    stats: TransportStats,
}

impl Transport {
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn regions(&self) -> SharedRegions {
        *self.regions.read()
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.device.status()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.deferred_runs = self.dispatcher.runs();
        snapshot.status_overflows = self.dispatcher.status_overflows();
        snapshot.power_overflows = self.power_queue.overflows();
        snapshot
    }

    fn channel_link<'a>(&'a self, regions: &'a SharedRegions) -> ChannelLink<'a> {
        ChannelLink { bus: &*self.bus, mailbox: &*self.mailbox, region: &regions.channel, stats: &self.stats }
    }

    fn msg_link<'a>(&'a self, region: &'a MsgRegion) -> MsgLink<'a> {
        MsgLink { bus: &*self.bus, mailbox: &*self.mailbox, region, stats: &self.stats }
    }

    /// Zeroes the channel control block and marks both message halves empty.
    fn prepare_window(&self, regions: &SharedRegions) {
        for offset in (0..SHM_CTRL_SIZE).step_by(4) {
            self.bus.write(regions.channel.ctrl + offset, 0);
        }
        for ctrl in [regions.message.input_ctrl, regions.message.output_ctrl] {
            for offset in (0..MSG_CTRL_SIZE).step_by(4) {
                self.bus.write(ctrl + offset, 0);
            }
            self.bus.write(ctrl + msg_ctrl::BUF_EMPTY, 1);
        }
    }

    /// Interrupt entry point. Never blocks and never allocates.
    pub fn handle_interrupt(&self) -> IrqOutcome {
        let Some(status) = self.irq.claim() else {
            bump(&self.stats.foreign_interrupts);
            return IrqOutcome::NotOurs;
        };
        bump(&self.stats.interrupts);
        match classify(status) {
            IrqClass::Power => {
                let outcome = self.power_queue.push(status);
                self.kick.power();
                IrqOutcome::PowerQueued(outcome)
            }
            IrqClass::Reset => {
                if self.device.mark_lost() {
                    bump(&self.stats.resets);
                }
                // The deferred body fails outstanding requests; no more data
                // interrupts will arrive to trigger it.
                self.schedule();
                IrqOutcome::Reset
            }
            IrqClass::Deferred => {
                self.dispatcher.post(status);
                self.kick.deferred();
                IrqOutcome::Deferred
            }
        }
    }

    /// Deferred worker body. Returns `false` if another run was active and
    /// absorbed this request.
    pub fn run_deferred(&self) -> bool {
        self.dispatcher.request();
        self.dispatcher.run(|statuses| self.service(statuses))
    }

    fn service(&self, statuses: &[u16]) {
        for &status in statuses.iter().filter(|status| is_fault(**status)) {
            bump(&self.stats.faults);
            self.faults.report(status);
        }
        if self.device.is_lost() {
            self.settle_lost();
            return;
        }
        let regions = self.regions();
        let link = self.channel_link(&regions);
        self.channels.dispatch_input(&link);
        self.channels.dispatch_output(&link, None);
        if let Some(messages) = &self.messages {
            let link = self.msg_link(&regions.message);
            messages.pump_inbound(&link);
            messages.pump_outbound(&link);
        }
        if let Some(trace) = self.trace.lock().as_mut() {
            add(&self.stats.trace_lines, trace.log(&*self.bus) as u64);
        }
    }

    /// Power worker body. Returns the number of requests handled.
    pub fn run_power(&self) -> usize {
        let Some(_gate) = self.power_gate.try_lock() else {
            return 0;
        };
        let drain = self.power_queue.drain_into(&*self.power, self.config.opp_count);
        add(&self.stats.power_requests, drain.forwarded as u64);
        add(&self.stats.power_failures, drain.failed as u64);
        drain.forwarded + drain.failed
    }

    fn settle_lost(&self) {
        if self.lost_settled.swap(true, Ordering::AcqRel) {
            return;
        }
        let failed = self.channels.fail_all(CompletionStatus::ConnectionLost);
        if let Some(messages) = &self.messages {
            messages.wake_all();
        }
        warn!("dsp-bridge: coprocessor reset; {failed} queued requests failed");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.device.is_lost() {
            self.settle_lost();
            return Err(Error::ConnectionLost);
        }
        Ok(())
    }

    fn schedule(&self) {
        self.dispatcher.request();
        self.kick.deferred();
    }

    pub fn open_channel(&self, id: ChannelId, direction: Direction) -> Result<()> {
        self.channels.open(id, direction, None)
    }

    /// Opens a channel whose completions also invoke `notify`.
    pub fn open_channel_with_notify(&self, id: ChannelId, direction: Direction, notify: ChannelNotify) -> Result<()> {
        self.channels.open(id, direction, Some(notify))
    }

    pub fn close_channel(&self, id: ChannelId) -> Result<()> {
        let regions = self.regions();
        self.channels.close(&self.channel_link(&regions), id)
    }

    /// Queues a request. Input buffers are filled up to their length; output
    /// buffers are sent whole and must fit the shared slot.
    pub fn submit(&self, id: ChannelId, direction: Direction, buffer: Vec<u8>, arg: u32) -> Result<()> {
        self.ensure_running()?;
        let regions = self.regions();
        let link = self.channel_link(&regions);
        self.channels.submit(&link, id, direction, buffer, arg)?;
        if direction == Direction::Output {
            self.channels.dispatch_output(&link, Some(id));
        }
        self.schedule();
        Ok(())
    }

    /// Cancels every queued request on the channel. Returns how many were cancelled.
    pub fn cancel(&self, id: ChannelId) -> Result<usize> {
        let regions = self.regions();
        self.channels.cancel(&self.channel_link(&regions), id)
    }

    pub fn take_completion(&self, id: ChannelId) -> Result<Option<Completion>> {
        if self.device.is_lost() {
            self.settle_lost();
        }
        self.channels.take_completion(id)
    }

    pub fn channel_state(&self, id: ChannelId) -> Result<ChannelState> {
        self.channels.state(id)
    }

    pub fn pending_requests(&self, id: ChannelId) -> Result<usize> {
        self.channels.pending(id)
    }

    fn messages(&self) -> Result<&Arc<MsgManager>> {
        self.messages.as_ref().ok_or(Error::InvalidState)
    }

    pub fn register_destination(&self, id: MsgQueueId, on_exit: Option<ExitNotify>) -> Result<MsgQueue> {
        self.messages()?.register(id, on_exit)
    }

    pub fn deregister_destination(&self, id: MsgQueueId) -> Result<()> {
        self.messages()?.deregister(id)
    }

    pub fn send(&self, dest: MsgQueueId, msg: DspMsg, wait: Wait) -> Result<()> {
        self.ensure_running()?;
        self.messages()?.send(dest, msg, wait)?;
        self.schedule();
        Ok(())
    }

    /// Re-reads the layout from a newly loaded image and restarts the
    /// transport. Requests still queued are failed with `ConnectionLost`.
    ///
    /// The device is treated as lost for the duration and stays lost if the
    /// new image cannot be mapped. Runs with the deferred gate held, so it
    /// must not be called from a completion or exit callback.
    pub fn reload(&self, symbols: &dyn SymbolTable) -> Result<()> {
        self.device.mark_lost();
        let reloaded = self.dispatcher.exclusive(|| self.remap(symbols));
        self.schedule();
        match reloaded {
            Ok(failed) => {
                info!("dsp-bridge: image reloaded, {failed} stale requests failed");
                Ok(())
            }
            Err(err) => {
                error!("dsp-bridge: reload failed, device stays down: {err}");
                Err(err)
            }
        }
    }

    fn remap(&self, symbols: &dyn SymbolTable) -> Result<usize> {
        self.settle_lost();
        self.mmu.unmap_all();
        let regions = map_shared_regions(symbols, &self.window, &*self.mmu, &self.config)?;
        self.prepare_window(&regions);
        *self.regions.write() = regions;
        *self.trace.lock() = trace_for(&regions);
        let failed = self.channels.fail_all(CompletionStatus::ConnectionLost);
        self.channels.rearm();
        if let Some(messages) = &self.messages {
            messages.discard_outbound();
        }
        self.lost_settled.store(false, Ordering::Release);
        self.device.mark_running();
        Ok(failed)
    }
}
