// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mailbox interrupt classification and deferred-work gating.
//!
//! The interrupt handler only classifies: power requests go to the power
//! queue, a reset is handled inline, everything else is buffered for the
//! deferred worker. The deferred body itself runs at most once at a time; a
//! run requested while one is active is folded into the active run.

use core::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};

use bridge_sync::{OverflowPolicy, PushOutcome, SpinLock, SpscRing};

/// Data/message traffic doorbell, both directions.
pub const MBX_PCPY_CLASS: u16 = 0x0000;
pub const MBX_PM_CLASS: u16 = 0x2000;
pub const MBX_PM_CLASS_MASK: u16 = 0xf000;
pub const MBX_PM_HIBERNATE_EN: u16 = 0x2a00;
/// Operating-point request; the low byte carries the table index.
pub const MBX_PM_OPP_REQ: u16 = 0x2b00;
pub const MBX_DEH_BASE: u16 = 0x0100;
pub const MBX_DEH_RESET: u16 = 0x0101;
pub const MBX_DEH_LIMIT: u16 = 0x0118;

/// Where an interrupt status is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqClass {
    Power,
    Reset,
    Deferred,
}

pub fn classify(status: u16) -> IrqClass {
    if status & MBX_PM_CLASS_MASK == MBX_PM_CLASS {
        IrqClass::Power
    } else if status == MBX_DEH_RESET {
        IrqClass::Reset
    } else {
        IrqClass::Deferred
    }
}

/// Statuses in the exception range other than the reset sentinel.
pub fn is_fault(status: u16) -> bool {
    (MBX_DEH_BASE..=MBX_DEH_LIMIT).contains(&status) && status != MBX_DEH_RESET
}

/// What the interrupt handler did with a claimed (or unclaimed) interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqOutcome {
    /// The line fired for another device.
    NotOurs,
    PowerQueued(PushOutcome),
    /// Device marked lost; nothing scheduled.
    Reset,
    Deferred,
}

/// Receives coprocessor exception reports.
pub trait FaultSink {
    fn report(&self, status: u16);
}

/// Status buffer plus the single-instance gate of the deferred worker.
pub struct Dispatcher {
    statuses: SpscRing,
    pending: AtomicBool,
    gate: SpinLock<()>,
    runs: AtomicU64,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            statuses: SpscRing::new(capacity, OverflowPolicy::DropNewest),
            pending: AtomicBool::new(false),
            gate: SpinLock::new(()),
            runs: AtomicU64::new(0),
        }
    }

    /// Interrupt context: buffers `status` and marks work pending. Never blocks.
    pub fn post(&self, status: u16) -> PushOutcome {
        let outcome = self.statuses.push(u32::from(status));
        self.request();
        outcome
    }

    /// Marks work pending without a status, e.g. after a client queued data.
    pub fn request(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn status_overflows(&self) -> u64 {
        self.statuses.overflows()
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Runs `body` with the buffered statuses until no work is pending.
    /// Returns `false` without running when another instance holds the gate;
    /// that instance picks up the request before it exits.
    pub fn run(&self, mut body: impl FnMut(&[u16])) -> bool {
        loop {
            // Pairs with the fence after unlocking: a requester that loses the
            // gate is guaranteed to be seen by the holder's final check.
            fence(Ordering::SeqCst);
            let Some(gate) = self.gate.try_lock() else {
                return false;
            };
            while self.pending.swap(false, Ordering::AcqRel) {
                let statuses: Vec<u16> = self.statuses.drain().map(|code| code as u16).collect();
                self.runs.fetch_add(1, Ordering::Relaxed);
                body(&statuses);
            }
            drop(gate);
            fence(Ordering::SeqCst);
            if !self.pending.load(Ordering::Acquire) {
                return true;
            }
        }
    }

    /// Runs `f` with the gate held, so no deferred body runs alongside it.
    /// A run attempted meanwhile returns `false` and leaves its request
    /// pending; the caller must schedule a run afterwards. Must not be called
    /// from inside `body`.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _gate = self.gate.lock();
        f()
    }
}
