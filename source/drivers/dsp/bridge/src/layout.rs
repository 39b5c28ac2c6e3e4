// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared-window layout agreed with the coprocessor firmware.
//!
//! Channel window:
//!
//! ```text
//! +--------------------------+ chnl base
//! | channel control block    | SHM_CTRL_SIZE bytes (u32 fields below)
//! +--------------------------+
//! | input slot               | slot_size bytes (coprocessor -> host)
//! +--------------------------+
//! | output slot              | slot_size bytes (host -> coprocessor)
//! +--------------------------+ chnl limit
//! ```
//!
//! Message window: two equal halves (input, then output), each a message
//! control block followed by `capacity` fixed-size records.
//!
//! All offsets in this crate are byte offsets from the start of the host
//! window handed to the transport.

/// Channel control block fields.
pub mod shm {
    /// Channels the coprocessor can accept output for (written by the coprocessor).
    pub const DSP_FREE_MASK: usize = 0x00;
    /// Channels the host has input buffers queued for (written by the host).
    pub const HOST_FREE_MASK: usize = 0x04;
    pub const INPUT_FULL: usize = 0x08;
    pub const INPUT_ID: usize = 0x0c;
    pub const INPUT_SIZE: usize = 0x10;
    pub const INPUT_ARG: usize = 0x14;
    pub const OUTPUT_FULL: usize = 0x18;
    pub const OUTPUT_ID: usize = 0x1c;
    pub const OUTPUT_SIZE: usize = 0x20;
    pub const OUTPUT_ARG: usize = 0x24;
}

pub const SHM_CTRL_SIZE: usize = 0x40;

/// Message control block fields.
pub mod msg_ctrl {
    pub const BUF_EMPTY: usize = 0x0;
    /// Set by the side that just produced or consumed a batch.
    pub const POST_SWI: usize = 0x4;
    /// Number of records in the batch.
    pub const SIZE: usize = 0x8;
}

pub const MSG_CTRL_SIZE: usize = 0x10;

/// Message record fields.
pub mod msg_record {
    pub const CMD: usize = 0x0;
    pub const ARG1: usize = 0x4;
    pub const ARG2: usize = 0x8;
    pub const MSGQ_ID: usize = 0xc;
}

pub const MSG_RECORD_SIZE: usize = 0x10;

/// Byte offsets of the channel control block and both slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelRegion {
    pub ctrl: usize,
    pub input: usize,
    pub output: usize,
    /// Payload capacity of each slot in bytes.
    pub slot_size: usize,
}

impl ChannelRegion {
    /// Splits a channel window of `len` bytes at `base`. Returns `None` when
    /// the window cannot hold the control block and two non-empty slots.
    pub fn split(base: usize, len: usize) -> Option<Self> {
        let slot_size = (len.checked_sub(SHM_CTRL_SIZE)? / 2) & !3;
        if slot_size == 0 {
            return None;
        }
        let input = base + SHM_CTRL_SIZE;
        Some(Self { ctrl: base, input, output: input + slot_size, slot_size })
    }
}

/// Byte offsets of both message halves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgRegion {
    pub input_ctrl: usize,
    pub input_records: usize,
    pub output_ctrl: usize,
    pub output_records: usize,
    /// Records per direction.
    pub capacity: usize,
}

impl MsgRegion {
    /// Splits a message window of `len` bytes at `base`. Returns `None` when
    /// a half cannot hold its control block and at least one record.
    pub fn split(base: usize, len: usize) -> Option<Self> {
        let half = (len / 2) & !3;
        let capacity = half.checked_sub(MSG_CTRL_SIZE)? / MSG_RECORD_SIZE;
        if capacity == 0 {
            return None;
        }
        Some(Self {
            input_ctrl: base,
            input_records: base + MSG_CTRL_SIZE,
            output_ctrl: base + half,
            output_records: base + half + MSG_CTRL_SIZE,
            capacity,
        })
    }

    pub fn input_record(&self, index: usize) -> usize {
        self.input_records + index * MSG_RECORD_SIZE
    }

    pub fn output_record(&self, index: usize) -> usize {
        self.output_records + index * MSG_RECORD_SIZE
    }
}

/// Circular firmware log: `[begin, end)` holds text, `writer` holds the
/// coprocessor's current write position as a coprocessor word address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceRegion {
    pub begin: usize,
    pub end: usize,
    pub writer: usize,
}
