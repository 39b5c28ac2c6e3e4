// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bus implementations for shared windows.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::Bus;

/// Host-memory window backed by atomic words.
///
/// Every access is sequentially consistent, so a simulated coprocessor
/// running on another thread observes writes in program order.
pub struct HeapWindow {
    words: Box<[AtomicU32]>,
    len: usize,
}

impl HeapWindow {
    /// Allocates a zeroed window of `len` bytes (rounded up to a whole word).
    pub fn new(len: usize) -> Self {
        let count = len.div_ceil(4);
        let words: Vec<AtomicU32> = (0..count).map(|_| AtomicU32::new(0)).collect();
        Self { words: words.into_boxed_slice(), len }
    }

    fn word(&self, addr: usize) -> &AtomicU32 {
        assert!(addr % 4 == 0, "unaligned word access at {addr:#x}");
        &self.words[addr / 4]
    }
}

impl Bus for HeapWindow {
    fn read(&self, addr: usize) -> u32 {
        self.word(addr).load(Ordering::SeqCst)
    }

    fn write(&self, addr: usize, value: u32) {
        self.word(addr).store(value, Ordering::SeqCst);
    }

    fn read_bytes(&self, addr: usize, buf: &mut [u8]) {
        assert!(addr + buf.len() <= self.len, "read past end of window");
        for (i, byte) in buf.iter_mut().enumerate() {
            let at = addr + i;
            let word = self.words[at / 4].load(Ordering::SeqCst);
            *byte = (word >> ((at % 4) * 8)) as u8;
        }
    }

    fn write_bytes(&self, addr: usize, data: &[u8]) {
        assert!(addr + data.len() <= self.len, "write past end of window");
        for (i, byte) in data.iter().enumerate() {
            let at = addr + i;
            let shift = (at % 4) * 8;
            let mask = 0xffu32 << shift;
            let bits = u32::from(*byte) << shift;
            // Only the owning side writes a given byte; the CAS keeps the
            // neighbouring bytes of the word intact.
            let _ = self.words[at / 4].fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
                Some((w & !mask) | bits)
            });
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Window over a physical mapping established by the platform.
pub struct MmioWindow {
    base: usize,
    len: usize,
}

// SAFETY: the mapping is device/shared memory; all accesses are volatile and
// the protocol layer serializes ownership through the control-block flags.
unsafe impl Send for MmioWindow {}
unsafe impl Sync for MmioWindow {}

impl MmioWindow {
    /// # Safety
    ///
    /// `base..base + len` must be a valid, mapped, uncached region that stays
    /// mapped for the lifetime of the window, and `base` must be 4-byte aligned.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self { base: base as usize, len }
    }

    fn check(&self, addr: usize, width: usize) {
        assert!(addr + width <= self.len, "access past end of window");
    }
}

impl Bus for MmioWindow {
    fn read(&self, addr: usize) -> u32 {
        self.check(addr, 4);
        // SAFETY: bounds checked above; alignment guaranteed by callers and `new`.
        unsafe { read_volatile((self.base + addr) as *const u32) }
    }

    fn write(&self, addr: usize, value: u32) {
        self.check(addr, 4);
        // SAFETY: as in `read`.
        unsafe { write_volatile((self.base + addr) as *mut u32, value) }
    }

    fn read_bytes(&self, addr: usize, buf: &mut [u8]) {
        self.check(addr, buf.len());
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: bounds checked above.
            *byte = unsafe { read_volatile((self.base + addr + i) as *const u8) };
        }
    }

    fn write_bytes(&self, addr: usize, data: &[u8]) {
        self.check(addr, data.len());
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: bounds checked above.
            unsafe { write_volatile((self.base + addr + i) as *mut u8, *byte) }
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}
