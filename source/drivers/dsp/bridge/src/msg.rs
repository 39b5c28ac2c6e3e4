// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Message manager: small fixed-size commands exchanged in batches.
//!
//! Every registered destination owns a pool of free frames and a FIFO of
//! received ones. Outbound frames come from a global pool that grows by the
//! per-destination allotment on each registration. The inbound pump runs
//! when the coprocessor has handed over a batch (`BUF_EMPTY == 0`); the
//! outbound pump runs when the coprocessor has consumed the previous batch
//! (`BUF_EMPTY != 0`).

use core::sync::atomic::{fence, Ordering};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_hal::{Bus, Mailbox};
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};

use crate::device::DeviceState;
use crate::error::{Error, Result};
use crate::isr::MBX_PCPY_CLASS;
use crate::layout::{msg_ctrl, msg_record, MsgRegion};
use crate::stats::{add, bump, TransportStats};

pub type MsgQueueId = u32;

/// Command the coprocessor sends when a node acknowledges its exit.
pub const MSG_EXIT_ACK: u32 = 0x4000_0000;

/// Upper bound on one sleep so blocked callers notice a coprocessor reset.
const LOST_POLL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DspMsg {
    pub cmd: u32,
    pub arg1: u32,
    pub arg2: u32,
}

/// Invoked with the destination and the status argument of an exit
/// acknowledgement. Runs in deferred-worker context.
pub type ExitNotify = Arc<dyn Fn(MsgQueueId, u32) + Send + Sync>;

/// How long a client call may sleep for a message or a free frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    NonBlocking,
    Blocking,
    Timeout(Duration),
}

#[derive(Clone, Copy, Default)]
struct Frame {
    msg: DspMsg,
    dest: MsgQueueId,
}

struct Queue {
    id: MsgQueueId,
    free: Vec<Frame>,
    used: VecDeque<Frame>,
    ready: Arc<Condvar>,
    on_exit: Option<ExitNotify>,
}

#[derive(Default)]
struct State {
    queues: Vec<Queue>,
    free: Vec<Frame>,
    outbound: VecDeque<Frame>,
    /// Global frames still owed after a deregistration found them in flight.
    retire: usize,
}

impl State {
    fn queue_mut(&mut self, id: MsgQueueId) -> Option<&mut Queue> {
        self.queues.iter_mut().find(|queue| queue.id == id)
    }

    fn recycle(&mut self, frame: Frame) {
        if self.retire > 0 {
            self.retire -= 1;
        } else {
            self.free.push(frame);
        }
    }
}

/// Shared-window access for one pump.
pub(crate) struct MsgLink<'a> {
    pub bus: &'a dyn Bus,
    pub mailbox: &'a dyn Mailbox,
    pub region: &'a MsgRegion,
    pub stats: &'a TransportStats,
}

pub struct MsgManager {
    state: Mutex<State>,
    frames_ready: Condvar,
    per_queue: usize,
    device: Arc<DeviceState>,
}

/// Receive handle of a registered destination.
pub struct MsgQueue {
    id: MsgQueueId,
    manager: Arc<MsgManager>,
}

impl MsgQueue {
    pub fn id(&self) -> MsgQueueId {
        self.id
    }

    pub fn get(&self, wait: Wait) -> Result<DspMsg> {
        self.manager.get(self.id, wait)
    }

    pub fn try_get(&self) -> Result<DspMsg> {
        self.get(Wait::NonBlocking)
    }
}

impl core::fmt::Debug for MsgQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MsgQueue").field("id", &self.id).finish()
    }
}

impl MsgManager {
    pub fn new(per_queue: usize, device: Arc<DeviceState>) -> Self {
        Self { state: Mutex::new(State::default()), frames_ready: Condvar::new(), per_queue, device }
    }

    pub fn register(self: &Arc<Self>, id: MsgQueueId, on_exit: Option<ExitNotify>) -> Result<MsgQueue> {
        let mut state = self.state.lock();
        if state.queues.iter().any(|queue| queue.id == id) {
            return Err(Error::DuplicateDestination(id));
        }
        state.queues.push(Queue {
            id,
            free: vec![Frame::default(); self.per_queue],
            used: VecDeque::new(),
            ready: Arc::new(Condvar::new()),
            on_exit,
        });
        let settle = self.per_queue.min(state.retire);
        state.retire -= settle;
        let grow = self.per_queue - settle;
        state.free.extend(core::iter::repeat(Frame::default()).take(grow));
        drop(state);
        self.frames_ready.notify_all();
        debug!("dsp-bridge: message destination {id} registered");
        Ok(MsgQueue { id, manager: self.clone() })
    }

    /// Removes a destination; undelivered messages are discarded and blocked
    /// receivers fail with `NoSuchDestination`.
    pub fn deregister(&self, id: MsgQueueId) -> Result<()> {
        let mut state = self.state.lock();
        let index =
            state.queues.iter().position(|queue| queue.id == id).ok_or(Error::NoSuchDestination(id))?;
        let queue = state.queues.remove(index);
        let take = self.per_queue.min(state.free.len());
        let keep = state.free.len() - take;
        state.free.truncate(keep);
        state.retire += self.per_queue - take;
        drop(state);
        queue.ready.notify_all();
        if !queue.used.is_empty() {
            debug!("dsp-bridge: destination {id} removed with {} undelivered messages", queue.used.len());
        }
        Ok(())
    }

    /// Frames available for new outbound messages.
    pub fn free_frames(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn get(&self, id: MsgQueueId, wait: Wait) -> Result<DspMsg> {
        let deadline = match wait {
            Wait::Timeout(limit) => Some(Instant::now() + limit),
            _ => None,
        };
        let mut state = self.state.lock();
        loop {
            if self.device.is_lost() {
                return Err(Error::ConnectionLost);
            }
            let queue = state.queue_mut(id).ok_or(Error::NoSuchDestination(id))?;
            if let Some(frame) = queue.used.pop_front() {
                queue.free.push(frame);
                return Ok(frame.msg);
            }
            let ready = queue.ready.clone();
            sleep(&ready, &mut state, wait, deadline)?;
        }
    }

    /// Queues `msg` for `dest`, taking a frame from the global pool.
    pub fn send(&self, dest: MsgQueueId, msg: DspMsg, wait: Wait) -> Result<()> {
        let deadline = match wait {
            Wait::Timeout(limit) => Some(Instant::now() + limit),
            _ => None,
        };
        let mut state = self.state.lock();
        loop {
            if self.device.is_lost() {
                return Err(Error::ConnectionLost);
            }
            if !state.queues.iter().any(|queue| queue.id == dest) {
                return Err(Error::NoSuchDestination(dest));
            }
            if let Some(mut frame) = state.free.pop() {
                frame.msg = msg;
                frame.dest = dest;
                state.outbound.push_back(frame);
                return Ok(());
            }
            sleep(&self.frames_ready, &mut state, wait, deadline)?;
        }
    }

    /// Moves one inbound batch into destination queues. Returns the number of
    /// messages delivered.
    pub(crate) fn pump_inbound(&self, link: &MsgLink<'_>) -> usize {
        let ctrl = link.region.input_ctrl;
        if link.bus.read(ctrl + msg_ctrl::BUF_EMPTY) != 0 {
            return 0;
        }
        fence(Ordering::SeqCst);
        let count = link.bus.read(ctrl + msg_ctrl::SIZE) as usize;
        if count > link.region.capacity {
            bump(&link.stats.corrupt_units);
            error!(
                "dsp-bridge: {}",
                Error::ProtocolCorruption(format!("{count} inbound messages, capacity {}", link.region.capacity))
            );
            return 0;
        }
        let records: Vec<(MsgQueueId, DspMsg)> = (0..count)
            .map(|index| {
                let at = link.region.input_record(index);
                let msg = DspMsg {
                    cmd: link.bus.read(at + msg_record::CMD),
                    arg1: link.bus.read(at + msg_record::ARG1),
                    arg2: link.bus.read(at + msg_record::ARG2),
                };
                (link.bus.read(at + msg_record::MSGQ_ID), msg)
            })
            .collect();

        let mut wake = Vec::new();
        let mut exits = Vec::new();
        let mut delivered = 0;
        {
            let mut state = self.state.lock();
            for (id, msg) in records {
                let Some(queue) = state.queue_mut(id) else {
                    warn!("dsp-bridge: message {:#x} for unknown destination {id} dropped", msg.cmd);
                    bump(&link.stats.messages_dropped);
                    continue;
                };
                if msg.cmd == MSG_EXIT_ACK {
                    if let Some(on_exit) = queue.on_exit.clone() {
                        exits.push((on_exit, id, msg.arg1));
                    }
                    continue;
                }
                match queue.free.pop() {
                    Some(mut frame) => {
                        frame.msg = msg;
                        frame.dest = id;
                        queue.used.push_back(frame);
                        wake.push(queue.ready.clone());
                        delivered += 1;
                    }
                    None => {
                        warn!("dsp-bridge: destination {id} has no free frame, message dropped");
                        bump(&link.stats.messages_dropped);
                    }
                }
            }
        }
        for ready in wake {
            ready.notify_all();
        }
        for (on_exit, id, status) in exits {
            on_exit(id, status);
        }

        link.bus.write(ctrl + msg_ctrl::POST_SWI, 1);
        fence(Ordering::SeqCst);
        link.bus.write(ctrl + msg_ctrl::BUF_EMPTY, 1);
        link.mailbox.send(MBX_PCPY_CLASS);
        add(&link.stats.messages_in, delivered as u64);
        delivered
    }

    /// Writes up to `capacity` queued messages into the outbound half.
    /// Returns the batch size.
    pub(crate) fn pump_outbound(&self, link: &MsgLink<'_>) -> usize {
        let ctrl = link.region.output_ctrl;
        if link.bus.read(ctrl + msg_ctrl::BUF_EMPTY) == 0 {
            return 0;
        }
        fence(Ordering::SeqCst);
        let batch: Vec<Frame> = {
            let mut state = self.state.lock();
            let take = state.outbound.len().min(link.region.capacity);
            let batch: Vec<Frame> = state.outbound.drain(..take).collect();
            for frame in &batch {
                state.recycle(*frame);
            }
            batch
        };
        if batch.is_empty() {
            return 0;
        }
        self.frames_ready.notify_all();

        for (index, frame) in batch.iter().enumerate() {
            let at = link.region.output_record(index);
            link.bus.write(at + msg_record::CMD, frame.msg.cmd);
            link.bus.write(at + msg_record::ARG1, frame.msg.arg1);
            link.bus.write(at + msg_record::ARG2, frame.msg.arg2);
            link.bus.write(at + msg_record::MSGQ_ID, frame.dest);
        }
        link.bus.write(ctrl + msg_ctrl::SIZE, batch.len() as u32);
        link.bus.write(ctrl + msg_ctrl::POST_SWI, 1);
        fence(Ordering::SeqCst);
        link.bus.write(ctrl + msg_ctrl::BUF_EMPTY, 0);
        link.mailbox.send(MBX_PCPY_CLASS);
        add(&link.stats.messages_out, batch.len() as u64);
        batch.len()
    }

    /// Wakes every sleeper so it observes the lost device.
    pub(crate) fn wake_all(&self) {
        let readies: Vec<Arc<Condvar>> = self.state.lock().queues.iter().map(|queue| queue.ready.clone()).collect();
        for ready in readies {
            ready.notify_all();
        }
        self.frames_ready.notify_all();
    }

    /// Returns unsent frames to the pool; they were addressed to the previous image.
    pub(crate) fn discard_outbound(&self) -> usize {
        let mut state = self.state.lock();
        let stale: Vec<Frame> = state.outbound.drain(..).collect();
        let count = stale.len();
        for frame in stale {
            state.recycle(frame);
        }
        drop(state);
        self.frames_ready.notify_all();
        count
    }
}

fn sleep(
    cond: &Condvar,
    state: &mut parking_lot::MutexGuard<'_, State>,
    wait: Wait,
    deadline: Option<Instant>,
) -> Result<()> {
    match (wait, deadline) {
        (Wait::NonBlocking, _) => Err(Error::WouldBlock),
        (Wait::Timeout(_), Some(deadline)) => {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            cond.wait_for(state, (deadline - now).min(LOST_POLL));
            Ok(())
        }
        _ => {
            cond.wait_for(state, LOST_POLL);
            Ok(())
        }
    }
}
