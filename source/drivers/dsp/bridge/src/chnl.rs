// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Channel transport: bulk data through the two single-slot mailboxes.
//!
//! Clients queue requests per channel; the deferred worker moves data between
//! those requests and the shared slots. Each slot is owned by whoever last
//! wrote its `full` word: the producer fills payload and header, then sets
//! `full`; the consumer reads, then clears it. A channel bit is set in
//! `HOST_FREE_MASK` while the host has input requests queued on it, and the
//! coprocessor advertises the channels it can take output for in
//! `DSP_FREE_MASK`.

use core::sync::atomic::{fence, Ordering};
use std::collections::VecDeque;
use std::sync::Arc;

use bitflags::bitflags;
use bridge_hal::{Bus, Mailbox};
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::isr::MBX_PCPY_CLASS;
use crate::layout::{shm, ChannelRegion};
use crate::stats::{add, bump, TransportStats};

pub type ChannelId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Coprocessor to host.
    Input,
    /// Host to coprocessor.
    Output,
}

bitflags! {
    /// Channel lifecycle flags; empty means the channel is not open.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ChannelState: u32 {
        const READY = 1 << 0;
        /// A zero-length input arrived; the stream is finished.
        const EOS = 1 << 1;
        const CANCELLED = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionStatus {
    Complete,
    EndOfStream,
    Cancelled,
    /// The coprocessor was reset while the request was queued.
    ConnectionLost,
}

/// A finished request handed back to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub channel: ChannelId,
    pub direction: Direction,
    pub status: CompletionStatus,
    /// Input: the bytes received. Output: the buffer that was submitted.
    pub data: Vec<u8>,
    /// Bytes moved through the slot.
    pub len: usize,
    pub arg: u32,
}

/// Called after completions are queued on a channel. Runs in deferred-worker
/// or client context with no transport lock held.
pub type ChannelNotify = Arc<dyn Fn(ChannelId) + Send + Sync>;

struct Request {
    buffer: Vec<u8>,
    arg: u32,
}

#[derive(Default)]
struct Channel {
    direction: Option<Direction>,
    state: ChannelState,
    pending: VecDeque<Request>,
    completed: VecDeque<Completion>,
    notify: Option<ChannelNotify>,
}

struct Table {
    channels: Vec<Channel>,
    /// Output channels with queued requests.
    output_mask: u32,
    last_output: usize,
}

/// Shared-window access for one dispatch or client call.
pub(crate) struct ChannelLink<'a> {
    pub bus: &'a dyn Bus,
    pub mailbox: &'a dyn Mailbox,
    pub region: &'a ChannelRegion,
    pub stats: &'a TransportStats,
}

enum Intake {
    Deliver(Request),
    Idle,
    Late,
    EosRepeat,
    Corrupt,
}

pub struct ChannelTransport {
    table: Mutex<Table>,
    /// Serializes writers of the output slot (deferred worker and submitting clients).
    output_slot: Mutex<()>,
    count: usize,
}

impl ChannelTransport {
    pub fn new(count: usize) -> Self {
        let channels = (0..count).map(|_| Channel::default()).collect();
        Self {
            table: Mutex::new(Table { channels, output_mask: 0, last_output: count - 1 }),
            output_slot: Mutex::new(()),
            count,
        }
    }

    fn index(&self, id: ChannelId) -> Result<usize> {
        let index = id as usize;
        if index < self.count {
            Ok(index)
        } else {
            Err(Error::InvalidChannel(id))
        }
    }

    pub fn open(&self, id: ChannelId, direction: Direction, notify: Option<ChannelNotify>) -> Result<()> {
        let index = self.index(id)?;
        let mut table = self.table.lock();
        let channel = &mut table.channels[index];
        if channel.direction.is_some() {
            return Err(Error::InvalidState);
        }
        *channel = Channel { direction: Some(direction), state: ChannelState::READY, notify, ..Channel::default() };
        debug!("dsp-bridge: channel {id} open ({direction:?})");
        Ok(())
    }

    pub fn state(&self, id: ChannelId) -> Result<ChannelState> {
        let index = self.index(id)?;
        Ok(self.table.lock().channels[index].state)
    }

    pub fn pending(&self, id: ChannelId) -> Result<usize> {
        let index = self.index(id)?;
        Ok(self.table.lock().channels[index].pending.len())
    }

    pub fn take_completion(&self, id: ChannelId) -> Result<Option<Completion>> {
        let index = self.index(id)?;
        Ok(self.table.lock().channels[index].completed.pop_front())
    }

    pub(crate) fn submit(
        &self,
        link: &ChannelLink<'_>,
        id: ChannelId,
        direction: Direction,
        buffer: Vec<u8>,
        arg: u32,
    ) -> Result<()> {
        let index = self.index(id)?;
        let mut table = self.table.lock();
        let channel = &mut table.channels[index];
        match channel.direction {
            None => return Err(Error::InvalidState),
            Some(open) if open != direction => return Err(Error::WrongDirection),
            Some(_) => {}
        }
        if channel.state.intersects(ChannelState::EOS | ChannelState::CANCELLED) {
            return Err(Error::InvalidState);
        }
        if direction == Direction::Output && buffer.len() > link.region.slot_size {
            return Err(Error::BufferTooLarge);
        }
        channel.pending.push_back(Request { buffer, arg });
        let bit = 1u32 << index;
        match direction {
            Direction::Input => update_mask(link.bus, link.region.ctrl + shm::HOST_FREE_MASK, bit, true),
            Direction::Output => table.output_mask |= bit,
        }
        Ok(())
    }

    /// Completes every queued request on `id` as cancelled and tells the
    /// coprocessor the channel no longer accepts data. Returns the number of
    /// requests cancelled.
    pub(crate) fn cancel(&self, link: &ChannelLink<'_>, id: ChannelId) -> Result<usize> {
        let index = self.index(id)?;
        let (cancelled, notify) = {
            let mut table = self.table.lock();
            let channel = &mut table.channels[index];
            let Some(direction) = channel.direction else {
                return Err(Error::InvalidState);
            };
            channel.state.insert(ChannelState::CANCELLED);
            let drained: Vec<Request> = channel.pending.drain(..).collect();
            let cancelled = drained.len();
            for request in drained {
                channel.completed.push_back(Completion {
                    channel: id,
                    direction,
                    status: CompletionStatus::Cancelled,
                    data: request.buffer,
                    len: 0,
                    arg: request.arg,
                });
            }
            let notify = channel.notify.clone();
            let bit = 1u32 << index;
            table.output_mask &= !bit;
            if direction == Direction::Input {
                update_mask(link.bus, link.region.ctrl + shm::HOST_FREE_MASK, bit, false);
            }
            (cancelled, notify)
        };
        link.mailbox.send(MBX_PCPY_CLASS);
        if cancelled > 0 {
            if let Some(notify) = notify {
                notify(id);
            }
        }
        debug!("dsp-bridge: channel {id} cancelled, {cancelled} requests flushed");
        Ok(cancelled)
    }

    /// Cancels and releases the channel. Undelivered completions are dropped.
    pub(crate) fn close(&self, link: &ChannelLink<'_>, id: ChannelId) -> Result<()> {
        self.cancel(link, id)?;
        let index = self.index(id)?;
        self.table.lock().channels[index] = Channel::default();
        Ok(())
    }

    /// Consumes the input slot if the coprocessor filled it.
    pub(crate) fn dispatch_input(&self, link: &ChannelLink<'_>) {
        let ctrl = link.region.ctrl;
        if link.bus.read(ctrl + shm::INPUT_FULL) == 0 {
            return;
        }
        fence(Ordering::SeqCst);
        let id = link.bus.read(ctrl + shm::INPUT_ID);
        let size = link.bus.read(ctrl + shm::INPUT_SIZE) as usize;
        let arg = link.bus.read(ctrl + shm::INPUT_ARG);

        let intake = if id as usize >= self.count || size > link.region.slot_size {
            Intake::Corrupt
        } else {
            let index = id as usize;
            let mut table = self.table.lock();
            let channel = &mut table.channels[index];
            match channel.direction {
                Some(Direction::Output) => Intake::Corrupt,
                None => Intake::Late,
                Some(Direction::Input) if channel.state.contains(ChannelState::CANCELLED) => Intake::Late,
                Some(Direction::Input) if size == 0 && channel.state.contains(ChannelState::EOS) => {
                    Intake::EosRepeat
                }
                Some(Direction::Input) => match channel.pending.pop_front() {
                    None => Intake::Idle,
                    Some(request) => {
                        if size == 0 {
                            channel.state.insert(ChannelState::EOS);
                        }
                        if channel.pending.is_empty() {
                            update_mask(link.bus, ctrl + shm::HOST_FREE_MASK, 1 << index, false);
                        }
                        Intake::Deliver(request)
                    }
                },
            }
        };

        match intake {
            Intake::Deliver(request) => {
                let mut data = request.buffer;
                let len = size.min(data.len());
                link.bus.read_bytes(link.region.input, &mut data[..len]);
                data.truncate(len);
                release_input(link);
                add(&link.stats.bytes_in, len as u64);
                let status = if size == 0 { CompletionStatus::EndOfStream } else { CompletionStatus::Complete };
                self.complete(Completion { channel: id, direction: Direction::Input, status, data, len, arg });
            }
            Intake::Idle => {
                bump(&link.stats.idle_drains);
                debug!("dsp-bridge: input on channel {id} with no request queued, drained");
                release_input(link);
            }
            Intake::Late => {
                bump(&link.stats.late_drops);
                debug!("dsp-bridge: late input on channel {id} dropped");
                release_input(link);
            }
            Intake::EosRepeat => {
                bump(&link.stats.eos_repeats);
                warn!("dsp-bridge: repeated end-of-stream on channel {id} ignored");
                release_input(link);
            }
            Intake::Corrupt => {
                bump(&link.stats.corrupt_units);
                error!("dsp-bridge: {}", Error::ProtocolCorruption(format!("input slot channel {id} size {size}")));
                release_input(link);
            }
        }
    }

    /// Fills the output slot from the next ready channel, searching from
    /// `from` or else round-robin after the last channel served. Returns
    /// whether a request was sent.
    pub(crate) fn dispatch_output(&self, link: &ChannelLink<'_>, from: Option<ChannelId>) -> bool {
        let slot = self.output_slot.lock();
        let ctrl = link.region.ctrl;
        if link.bus.read(ctrl + shm::OUTPUT_FULL) != 0 {
            return false;
        }
        fence(Ordering::SeqCst);
        let dsp_free = link.bus.read(ctrl + shm::DSP_FREE_MASK);
        let (index, request) = {
            let mut table = self.table.lock();
            let ready = table.output_mask & dsp_free;
            let start = from.map_or(table.last_output + 1, |id| id as usize) % self.count;
            let Some(index) = next_ready(ready, start, self.count) else {
                return false;
            };
            table.last_output = index;
            let request = table.channels[index].pending.pop_front();
            if table.channels[index].pending.is_empty() {
                table.output_mask &= !(1u32 << index);
            }
            match request {
                Some(request) => (index, request),
                None => return false,
            }
        };

        let len = request.buffer.len().min(link.region.slot_size);
        link.bus.write_bytes(link.region.output, &request.buffer[..len]);
        link.bus.write(ctrl + shm::OUTPUT_ID, index as u32);
        link.bus.write(ctrl + shm::OUTPUT_SIZE, len as u32);
        link.bus.write(ctrl + shm::OUTPUT_ARG, request.arg);
        fence(Ordering::SeqCst);
        link.bus.write(ctrl + shm::OUTPUT_FULL, 1);
        drop(slot);
        link.mailbox.send(MBX_PCPY_CLASS);
        add(&link.stats.bytes_out, len as u64);
        self.complete(Completion {
            channel: index as ChannelId,
            direction: Direction::Output,
            status: CompletionStatus::Complete,
            data: request.buffer,
            len,
            arg: request.arg,
        });
        true
    }

    /// Fails every queued request with `status` without touching the window.
    pub(crate) fn fail_all(&self, status: CompletionStatus) -> usize {
        let mut notifies = Vec::new();
        let mut failed = 0;
        {
            let mut table = self.table.lock();
            for (index, channel) in table.channels.iter_mut().enumerate() {
                let Some(direction) = channel.direction else { continue };
                if channel.pending.is_empty() {
                    continue;
                }
                for request in channel.pending.drain(..) {
                    channel.completed.push_back(Completion {
                        channel: index as ChannelId,
                        direction,
                        status,
                        data: request.buffer,
                        len: 0,
                        arg: request.arg,
                    });
                    failed += 1;
                }
                if let Some(notify) = channel.notify.clone() {
                    notifies.push((index as ChannelId, notify));
                }
            }
            table.output_mask = 0;
            table.last_output = self.count - 1;
        }
        for (id, notify) in notifies {
            notify(id);
        }
        failed
    }

    /// Clears per-stream state so open channels can run against a fresh image.
    pub(crate) fn rearm(&self) {
        let mut table = self.table.lock();
        for channel in table.channels.iter_mut().filter(|c| c.direction.is_some()) {
            channel.state.remove(ChannelState::EOS);
        }
    }

    fn complete(&self, completion: Completion) {
        let id = completion.channel;
        let notify = {
            let mut table = self.table.lock();
            let channel = &mut table.channels[id as usize];
            channel.completed.push_back(completion);
            channel.notify.clone()
        };
        if let Some(notify) = notify {
            notify(id);
        }
    }
}

fn next_ready(ready: u32, start: usize, count: usize) -> Option<usize> {
    (0..count).map(|step| (start + step) % count).find(|index| ready & (1 << index) != 0)
}

fn update_mask(bus: &dyn Bus, addr: usize, bit: u32, set: bool) {
    let mask = bus.read(addr);
    bus.write(addr, if set { mask | bit } else { mask & !bit });
}

fn release_input(link: &ChannelLink<'_>) {
    fence(Ordering::SeqCst);
    link.bus.write(link.region.ctrl + shm::INPUT_FULL, 0);
    link.mailbox.send(MBX_PCPY_CLASS);
}
