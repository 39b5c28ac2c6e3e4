// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Power-management requests raised by the coprocessor.
//!
//! The interrupt handler pushes raw mailbox codes; the power worker decodes
//! and forwards them to the platform. A failed request is logged and skipped.

use bridge_sync::{OverflowPolicy, PushOutcome, SpscRing};
use log::{debug, warn};

use crate::isr::{MBX_PM_HIBERNATE_EN, MBX_PM_OPP_REQ};

/// A decoded power-class mailbox code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerRequest {
    HibernateEnable,
    OperatingPoint(u8),
    /// Any other power-class code, passed through as a clock command.
    ClockControl(u16),
}

impl PowerRequest {
    pub fn decode(code: u16) -> Self {
        match code {
            MBX_PM_HIBERNATE_EN => Self::HibernateEnable,
            _ if code & 0xff00 == MBX_PM_OPP_REQ => Self::OperatingPoint((code & 0xff) as u8),
            _ => Self::ClockControl(code),
        }
    }
}

/// Platform power hooks. Called from the power worker only.
pub trait PowerControl {
    fn hibernate(&self) -> Result<(), String>;
    fn set_operating_point(&self, index: u8) -> Result<(), String>;
    fn clock_control(&self, code: u16) -> Result<(), String>;
}

/// Drain counters of one [`PowerQueue::drain_into`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PowerDrain {
    pub forwarded: usize,
    pub failed: usize,
}

/// Bounded queue between the interrupt handler and the power worker.
pub struct PowerQueue {
    ring: SpscRing,
}

impl PowerQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self { ring: SpscRing::new(capacity, policy) }
    }

    /// Interrupt context.
    pub fn push(&self, code: u16) -> PushOutcome {
        self.ring.push(u32::from(code))
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn overflows(&self) -> u64 {
        self.ring.overflows()
    }

    /// Worker context: forwards every queued request in arrival order.
    /// Operating-point indices at or above `opp_count` are rejected.
    pub fn drain_into(&self, control: &dyn PowerControl, opp_count: u32) -> PowerDrain {
        let mut drain = PowerDrain::default();
        for code in self.ring.drain() {
            let code = code as u16;
            let request = PowerRequest::decode(code);
            let result = match request {
                PowerRequest::HibernateEnable => control.hibernate(),
                PowerRequest::OperatingPoint(index) if u32::from(index) >= opp_count => {
                    Err(format!("operating point {index} outside table of {opp_count}"))
                }
                PowerRequest::OperatingPoint(index) => control.set_operating_point(index),
                PowerRequest::ClockControl(code) => control.clock_control(code),
            };
            match result {
                Ok(()) => {
                    debug!("dsp-bridge: power {request:?} done");
                    drain.forwarded += 1;
                }
                Err(reason) => {
                    warn!("dsp-bridge: power request {code:#06x} failed: {reason}");
                    drain.failed += 1;
                }
            }
        }
        drain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<PowerRequest>>,
        fail_clock: bool,
    }

    impl PowerControl for Recorder {
        fn hibernate(&self) -> Result<(), String> {
            self.calls.lock().push(PowerRequest::HibernateEnable);
            Ok(())
        }

        fn set_operating_point(&self, index: u8) -> Result<(), String> {
            self.calls.lock().push(PowerRequest::OperatingPoint(index));
            Ok(())
        }

        fn clock_control(&self, code: u16) -> Result<(), String> {
            self.calls.lock().push(PowerRequest::ClockControl(code));
            if self.fail_clock {
                Err("clock busy".into())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn decodes_power_codes() {
        assert_eq!(PowerRequest::decode(0x2a00), PowerRequest::HibernateEnable);
        assert_eq!(PowerRequest::decode(0x2b04), PowerRequest::OperatingPoint(4));
        assert_eq!(PowerRequest::decode(0x2c01), PowerRequest::ClockControl(0x2c01));
    }

    #[test]
    fn drains_in_order_and_skips_failures() {
        let queue = PowerQueue::new(8, OverflowPolicy::DropNewest);
        for code in [0x2a00, 0x2c01, 0x2b02, 0x2b09] {
            assert_eq!(queue.push(code), PushOutcome::Stored);
        }
        let control = Recorder { fail_clock: true, ..Recorder::default() };
        let drain = queue.drain_into(&control, 6);
        assert_eq!(drain, PowerDrain { forwarded: 2, failed: 2 });
        assert_eq!(
            *control.calls.lock(),
            vec![
                PowerRequest::HibernateEnable,
                PowerRequest::ClockControl(0x2c01),
                PowerRequest::OperatingPoint(2)
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_policies() {
        let drop_newest = PowerQueue::new(2, OverflowPolicy::DropNewest);
        let overwrite = PowerQueue::new(2, OverflowPolicy::Overwrite);
        for code in [0x2b00, 0x2b01, 0x2b02] {
            drop_newest.push(code);
            overwrite.push(code);
        }
        let control = Recorder::default();
        drop_newest.drain_into(&control, 6);
        assert_eq!(*control.calls.lock(), vec![PowerRequest::OperatingPoint(0), PowerRequest::OperatingPoint(1)]);
        control.calls.lock().clear();
        overwrite.drain_into(&control, 6);
        assert_eq!(*control.calls.lock(), vec![PowerRequest::OperatingPoint(1), PowerRequest::OperatingPoint(2)]);
        assert_eq!(drop_newest.overflows(), 1);
        assert_eq!(overwrite.overflows(), 1);
    }
}
