// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transport configuration, loadable from TOML.

use std::fs;
use std::path::Path;

use bridge_sync::OverflowPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of channels; one bit each in the shared free masks.
pub const MAX_CHANNELS: usize = 32;

const PAGE_4K: u64 = 0x1000;

/// Capacity-exceeded behaviour of the power mailbox queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerOverflow {
    /// Refuse the newest request and count the drop.
    DropNewest,
    /// Legacy behaviour: silently replace the oldest unread request.
    Overwrite,
}

impl From<PowerOverflow> for OverflowPolicy {
    fn from(value: PowerOverflow) -> Self {
        match value {
            PowerOverflow::DropNewest => OverflowPolicy::DropNewest,
            PowerOverflow::Overwrite => OverflowPolicy::Overwrite,
        }
    }
}

/// Tunables for one bridge device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Bytes per coprocessor word; symbol values are in words.
    pub word_size: usize,
    pub channels: usize,
    pub power_queue_capacity: usize,
    pub power_overflow: PowerOverflow,
    /// Interrupt statuses buffered between the ISR and the deferred worker.
    pub deferred_queue_capacity: usize,
    pub messaging: bool,
    pub trace: bool,
    /// Candidate translation page sizes, largest first.
    pub page_sizes: Vec<u64>,
    /// Lockable TLB entries available to the shared window.
    pub tlb_entries: usize,
    /// Entries in the platform operating-point table.
    pub opp_count: u32,
    /// Frames allotted to each registered message destination.
    pub max_queue_messages: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            word_size: 2,
            channels: MAX_CHANNELS,
            power_queue_capacity: 32,
            power_overflow: PowerOverflow::DropNewest,
            deferred_queue_capacity: 32,
            messaging: true,
            trace: false,
            page_sizes: vec![0x100_0000, 0x10_0000, 0x1_0000, PAGE_4K],
            tlb_entries: 32,
            opp_count: 6,
            max_queue_messages: 16,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| Error::Config(format!("bridge config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| Error::Config(err.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if ![1, 2, 4].contains(&self.word_size) {
            return Err(Error::Config(format!("word_size {} not in {{1, 2, 4}}", self.word_size)));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(Error::Config(format!("channels must be 1..={MAX_CHANNELS}")));
        }
        for (name, cap) in [
            ("power_queue_capacity", self.power_queue_capacity),
            ("deferred_queue_capacity", self.deferred_queue_capacity),
        ] {
            if cap < 2 || !cap.is_power_of_two() {
                return Err(Error::Config(format!("{name} must be a power of two >= 2")));
            }
        }
        if self.page_sizes.is_empty() {
            return Err(Error::Config("page_sizes is empty".into()));
        }
        if self.page_sizes.iter().any(|size| *size == 0 || size % PAGE_4K != 0) {
            return Err(Error::Config("page sizes must be non-zero multiples of 4 KiB".into()));
        }
        if self.page_sizes.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(Error::Config("page_sizes must be strictly descending".into()));
        }
        if self.max_queue_messages == 0 {
            return Err(Error::Config("max_queue_messages must be non-zero".into()));
        }
        Ok(())
    }

    /// Smallest configured page size; the granule used once the TLB budget runs out.
    pub fn min_page(&self) -> u64 {
        self.page_sizes.last().copied().unwrap_or(PAGE_4K)
    }
}
