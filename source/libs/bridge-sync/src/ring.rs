// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded lock-free SPSC ring of 32-bit codes.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// What `push` does when the ring already holds `capacity` unread codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Refuse the new code and count it.
    DropNewest,
    /// Evict the oldest unread code and count it.
    Overwrite,
}

/// Result of a single `push`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// Ring full under `DropNewest`; the code was discarded.
    Dropped,
    /// Ring full under `Overwrite`; the oldest unread code was discarded.
    Overwrote,
}

/// Single-producer/single-consumer ring.
///
/// `head` and `tail` are free-running counters; `head - tail` is the number of
/// unread codes. The consumer claims a slot by CAS on `tail`, so under
/// `Overwrite` the producer can evict the oldest slot without racing a read
/// in progress: whichever CAS loses retries.
pub struct SpscRing {
    slots: Box<[AtomicU32]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    policy: OverflowPolicy,
    overflows: AtomicU64,
}

impl SpscRing {
    /// Creates a ring holding `capacity` codes. `capacity` must be a power of two.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        let slots: Vec<AtomicU32> = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            policy,
            overflows: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of codes lost to overflow since creation.
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Producer side. Never blocks.
    pub fn push(&self, code: u32) -> PushOutcome {
        let head = self.head.load(Ordering::Relaxed);
        let mut outcome = PushOutcome::Stored;
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) < self.capacity() {
                break;
            }
            match self.policy {
                OverflowPolicy::DropNewest => {
                    self.overflows.fetch_add(1, Ordering::Relaxed);
                    return PushOutcome::Dropped;
                }
                OverflowPolicy::Overwrite => {
                    if self
                        .tail
                        .compare_exchange(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.overflows.fetch_add(1, Ordering::Relaxed);
                        outcome = PushOutcome::Overwrote;
                        break;
                    }
                    // Consumer took the oldest slot first; room is available now.
                }
            }
        }
        self.slots[head & self.mask].store(code, Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        outcome
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<u32> {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if head == tail {
                return None;
            }
            let code = self.slots[tail & self.mask].load(Ordering::Relaxed);
            if self
                .tail
                .compare_exchange(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(code);
            }
        }
    }

    /// Pops every readable code in FIFO order.
    pub fn drain(&self) -> impl Iterator<Item = u32> + '_ {
        core::iter::from_fn(move || self.pop())
    }
}
