// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

//! CONTEXT: Hardware seams shared by the DSP bridge transport
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + tests/window.rs
//!
//! PUBLIC API:
//!   - Bus: word/byte access to a window shared with the coprocessor
//!   - Mailbox: host -> coprocessor doorbell
//!   - InterruptSource: claims a mailbox interrupt and yields its 16-bit status
//!   - MmuMapper, Mapping, MapAttrs: coprocessor-side address translation
//!   - HeapWindow (alloc), MmioWindow: Bus implementations
//!
//! DEPENDENCIES:
//!   - bitflags: MapAttrs
//!   - parking_lot (std): RecordingMapper

extern crate alloc;

pub mod mmu;
pub mod window;

pub use mmu::{MapAttrs, MapError, Mapping, MmuMapper};
#[cfg(feature = "std")]
pub use mmu::RecordingMapper;
pub use window::{HeapWindow, MmioWindow};

/// Access to a memory window shared with the coprocessor.
///
/// `addr` is a byte offset from the start of the window. Word accesses must be
/// 4-byte aligned; byte copies may start anywhere. Words are little-endian.
pub trait Bus {
    fn read(&self, addr: usize) -> u32;
    fn write(&self, addr: usize, value: u32);
    fn read_bytes(&self, addr: usize, buf: &mut [u8]);
    fn write_bytes(&self, addr: usize, data: &[u8]);
    /// Window length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: Bus + ?Sized> Bus for &B {
    fn read(&self, addr: usize) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: usize, value: u32) {
        (**self).write(addr, value)
    }

    fn read_bytes(&self, addr: usize, buf: &mut [u8]) {
        (**self).read_bytes(addr, buf)
    }

    fn write_bytes(&self, addr: usize, data: &[u8]) {
        (**self).write_bytes(addr, data)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

impl<B: Bus + ?Sized> Bus for alloc::sync::Arc<B> {
    fn read(&self, addr: usize) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: usize, value: u32) {
        (**self).write(addr, value)
    }

    fn read_bytes(&self, addr: usize, buf: &mut [u8]) {
        (**self).read_bytes(addr, buf)
    }

    fn write_bytes(&self, addr: usize, data: &[u8]) {
        (**self).write_bytes(addr, data)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// Doorbell towards the coprocessor. Must not block: it is rung from
/// deferred-work context and, for reset acknowledgement, from the ISR.
pub trait Mailbox {
    fn send(&self, code: u16);
}

/// Device-specific interrupt classifier.
///
/// The interrupt line may be shared, so `claim` returns `None` when the
/// pending interrupt does not belong to this device. A claimed interrupt is
/// acknowledged at the controller before the status is returned.
pub trait InterruptSource {
    fn claim(&self) -> Option<u16>;
}
