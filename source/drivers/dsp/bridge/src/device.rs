// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Coprocessor liveness, shared by every transport context.

use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceStatus {
    Running = 0,
    /// The coprocessor reset itself; nothing moves until the next image load.
    Lost = 1,
}

/// Lock-free status word; safe to flip from the interrupt handler.
#[derive(Debug, Default)]
pub struct DeviceState {
    status: AtomicU8,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> DeviceStatus {
        match self.status.load(Ordering::Acquire) {
            0 => DeviceStatus::Running,
            _ => DeviceStatus::Lost,
        }
    }

    pub fn is_lost(&self) -> bool {
        self.status() == DeviceStatus::Lost
    }

    /// Returns `true` if this call moved the device from running to lost.
    pub fn mark_lost(&self) -> bool {
        self.status.swap(DeviceStatus::Lost as u8, Ordering::AcqRel) == DeviceStatus::Running as u8
    }

    pub fn mark_running(&self) {
        self.status.store(DeviceStatus::Running as u8, Ordering::Release);
    }
}
