// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transport counters.

use core::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($name:ident),* $(,)?) => {
        /// Live counters, bumped from interrupt, deferred and client context.
        #[derive(Debug, Default)]
        pub struct TransportStats {
            $(pub(crate) $name: AtomicU64,)*
        }

        /// Point-in-time copy of [`TransportStats`].
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $(pub $name: u64,)*
        }

        impl TransportStats {
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot { $($name: self.$name.load(Ordering::Relaxed),)* }
            }
        }
    };
}

counters! {
    interrupts,
    foreign_interrupts,
    deferred_runs,
    faults,
    resets,
    status_overflows,
    bytes_in,
    bytes_out,
    idle_drains,
    late_drops,
    eos_repeats,
    messages_in,
    messages_out,
    messages_dropped,
    corrupt_units,
    power_requests,
    power_failures,
    power_overflows,
    trace_lines,
}

pub(crate) fn bump(counter: &AtomicU64) {
    add(counter, 1);
}

pub(crate) fn add(counter: &AtomicU64, value: u64) {
    counter.fetch_add(value, Ordering::Relaxed);
}
