// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Coprocessor side of the shared-window protocol, for host tests and the
//! `bridge-sim` tool.
//!
//! [`SimDsp`] plays the firmware: it fills the input slot, drains the output
//! slot, exchanges message batches and writes trace text, following the same
//! ownership rules as the host.

use core::sync::atomic::{fence, Ordering};
use std::collections::HashMap;

use bridge_hal::{InterruptSource, Mailbox};
use bridge_sync::{OverflowPolicy, SpscRing};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::chnl::ChannelId;
use crate::isr::MBX_PCPY_CLASS;
use crate::layout::{msg_ctrl, msg_record, shm};
use crate::mapper::SharedRegions;
use crate::msg::{DspMsg, MsgQueueId};
use crate::symbols::{self, StaticSymbols};
use crate::transport::SharedBus;

/// Window symbols of a simulated image, in coprocessor words.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimImage {
    pub dynext: u32,
    pub channel: [u32; 2],
    pub message: [u32; 2],
    /// Trace buffer bounds and the word holding the writer position.
    pub trace: Option<[u32; 3]>,
}

impl Default for SimImage {
    fn default() -> Self {
        Self {
            dynext: 0x2000,
            channel: [0x2000, 0x3000],
            message: [0x3000, 0x3400],
            trace: Some([0x3400, 0x3480, 0x3480]),
        }
    }
}

impl SimImage {
    pub fn symbols(&self) -> StaticSymbols {
        let mut table = StaticSymbols::new()
            .with(symbols::DYNEXT_BASE, self.dynext)
            .with(symbols::SHM_BASE, self.channel[0])
            .with(symbols::SHM_LIMIT, self.channel[1])
            .with(symbols::MSG_BASE, self.message[0])
            .with(symbols::MSG_LIMIT, self.message[1]);
        if let Some([begin, end, writer]) = self.trace {
            table.insert(symbols::TRACE_BASE, begin);
            table.insert(symbols::TRACE_LIMIT, end);
            table.insert(symbols::TRACE_WRITER, writer);
        }
        table
    }
}

/// Output the simulated firmware pulled from the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimOutput {
    pub channel: ChannelId,
    pub data: Vec<u8>,
    pub arg: u32,
}

pub struct SimDsp {
    bus: SharedBus,
    regions: SharedRegions,
    trace_pos: Mutex<usize>,
}

impl SimDsp {
    pub fn new(bus: SharedBus, regions: SharedRegions) -> Self {
        let trace_pos = regions.trace.map_or(0, |trace| trace.begin);
        Self { bus, regions, trace_pos: Mutex::new(trace_pos) }
    }

    /// Channels the firmware can take output for.
    pub fn set_free_mask(&self, mask: u32) {
        self.bus.write(self.regions.channel.ctrl + shm::DSP_FREE_MASK, mask);
    }

    /// Channels the host has input buffers queued for.
    pub fn host_free_mask(&self) -> u32 {
        self.bus.read(self.regions.channel.ctrl + shm::HOST_FREE_MASK)
    }

    pub fn input_full(&self) -> bool {
        self.bus.read(self.regions.channel.ctrl + shm::INPUT_FULL) != 0
    }

    pub fn output_full(&self) -> bool {
        self.bus.read(self.regions.channel.ctrl + shm::OUTPUT_FULL) != 0
    }

    /// Fills the input slot. Returns `false` while the host still owns it.
    pub fn send_input(&self, channel: ChannelId, payload: &[u8], arg: u32) -> bool {
        let region = &self.regions.channel;
        if self.input_full() {
            return false;
        }
        let len = payload.len().min(region.slot_size);
        self.bus.write_bytes(region.input, &payload[..len]);
        self.bus.write(region.ctrl + shm::INPUT_ID, channel);
        self.bus.write(region.ctrl + shm::INPUT_SIZE, len as u32);
        self.bus.write(region.ctrl + shm::INPUT_ARG, arg);
        fence(Ordering::SeqCst);
        self.bus.write(region.ctrl + shm::INPUT_FULL, 1);
        true
    }

    /// Writes raw header values without bounds checks, to model corrupt firmware.
    pub fn send_raw_input(&self, channel: u32, size: u32) {
        let ctrl = self.regions.channel.ctrl;
        self.bus.write(ctrl + shm::INPUT_ID, channel);
        self.bus.write(ctrl + shm::INPUT_SIZE, size);
        fence(Ordering::SeqCst);
        self.bus.write(ctrl + shm::INPUT_FULL, 1);
    }

    /// Drains the output slot if the host filled it.
    pub fn take_output(&self) -> Option<SimOutput> {
        let region = &self.regions.channel;
        if !self.output_full() {
            return None;
        }
        fence(Ordering::SeqCst);
        let channel = self.bus.read(region.ctrl + shm::OUTPUT_ID);
        let len = self.bus.read(region.ctrl + shm::OUTPUT_SIZE) as usize;
        let arg = self.bus.read(region.ctrl + shm::OUTPUT_ARG);
        let mut data = vec![0; len.min(region.slot_size)];
        self.bus.read_bytes(region.output, &mut data);
        fence(Ordering::SeqCst);
        self.bus.write(region.ctrl + shm::OUTPUT_FULL, 0);
        Some(SimOutput { channel, data, arg })
    }

    /// Hands a message batch to the host. Returns `false` while the host has
    /// not consumed the previous batch or when `batch` exceeds capacity.
    pub fn post_messages(&self, batch: &[(MsgQueueId, DspMsg)]) -> bool {
        let region = &self.regions.message;
        if self.bus.read(region.input_ctrl + msg_ctrl::BUF_EMPTY) == 0 || batch.len() > region.capacity {
            return false;
        }
        for (index, (dest, msg)) in batch.iter().enumerate() {
            let at = region.input_record(index);
            self.bus.write(at + msg_record::CMD, msg.cmd);
            self.bus.write(at + msg_record::ARG1, msg.arg1);
            self.bus.write(at + msg_record::ARG2, msg.arg2);
            self.bus.write(at + msg_record::MSGQ_ID, *dest);
        }
        self.bus.write(region.input_ctrl + msg_ctrl::SIZE, batch.len() as u32);
        fence(Ordering::SeqCst);
        self.bus.write(region.input_ctrl + msg_ctrl::BUF_EMPTY, 0);
        true
    }

    /// Writes a raw inbound count, to model corrupt firmware.
    pub fn post_raw_message_count(&self, count: u32) {
        let ctrl = self.regions.message.input_ctrl;
        self.bus.write(ctrl + msg_ctrl::SIZE, count);
        fence(Ordering::SeqCst);
        self.bus.write(ctrl + msg_ctrl::BUF_EMPTY, 0);
    }

    pub fn inbound_pending(&self) -> bool {
        self.bus.read(self.regions.message.input_ctrl + msg_ctrl::BUF_EMPTY) == 0
    }

    /// Consumes the host's outbound batch, if any.
    pub fn take_messages(&self) -> Vec<(MsgQueueId, DspMsg)> {
        let region = &self.regions.message;
        if self.bus.read(region.output_ctrl + msg_ctrl::BUF_EMPTY) != 0 {
            return Vec::new();
        }
        fence(Ordering::SeqCst);
        let count = (self.bus.read(region.output_ctrl + msg_ctrl::SIZE) as usize).min(region.capacity);
        let batch = (0..count)
            .map(|index| {
                let at = region.output_record(index);
                let msg = DspMsg {
                    cmd: self.bus.read(at + msg_record::CMD),
                    arg1: self.bus.read(at + msg_record::ARG1),
                    arg2: self.bus.read(at + msg_record::ARG2),
                };
                (self.bus.read(at + msg_record::MSGQ_ID), msg)
            })
            .collect();
        fence(Ordering::SeqCst);
        self.bus.write(region.output_ctrl + msg_ctrl::BUF_EMPTY, 1);
        batch
    }

    /// Appends `text` to the trace buffer, wrapping at its end, and publishes
    /// the new writer position. Does nothing when the image has no trace buffer.
    pub fn write_trace(&self, text: &str) {
        let Some(trace) = self.regions.trace else { return };
        let mut pos = self.trace_pos.lock();
        for byte in text.bytes() {
            self.bus.write_bytes(*pos, &[byte]);
            *pos += 1;
            if *pos == trace.end {
                *pos = trace.begin;
            }
        }
        let words = (*pos / self.regions.word_size) as u32;
        fence(Ordering::SeqCst);
        self.bus.write(trace.writer, self.regions.dsp_base + words);
    }
}

/// Mailbox that records every doorbell code.
#[derive(Default)]
pub struct RecordingMailbox {
    codes: Mutex<Vec<u16>>,
}

impl RecordingMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<u16> {
        core::mem::take(&mut *self.codes.lock())
    }

    /// Data-class doorbells rung so far, without consuming them.
    pub fn data_signals(&self) -> usize {
        self.codes.lock().iter().filter(|code| **code == MBX_PCPY_CLASS).count()
    }
}

impl Mailbox for RecordingMailbox {
    fn send(&self, code: u16) {
        self.codes.lock().push(code);
    }
}

/// Interrupt source fed by the test or simulator; never blocks.
pub struct ScriptedInterrupts {
    pending: SpscRing,
}

impl ScriptedInterrupts {
    pub fn new(capacity: usize) -> Self {
        Self { pending: SpscRing::new(capacity.next_power_of_two().max(2), OverflowPolicy::DropNewest) }
    }

    /// Raises an interrupt carrying `status`.
    pub fn raise(&self, status: u16) {
        self.pending.push(u32::from(status));
    }
}

impl InterruptSource for ScriptedInterrupts {
    fn claim(&self) -> Option<u16> {
        self.pending.pop().map(|status| status as u16)
    }
}

/// Named channel payload tallies, handy for simulator reports.
pub fn tally(outputs: &[SimOutput]) -> HashMap<ChannelId, usize> {
    let mut totals = HashMap::new();
    for output in outputs {
        *totals.entry(output.channel).or_insert(0) += output.data.len();
    }
    totals
}
