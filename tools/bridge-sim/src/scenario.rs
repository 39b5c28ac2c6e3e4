// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scenario files: transport config, simulated image and a list of steps.

use std::fs;
use std::path::Path;

use dsp_bridge::sim::SimImage;
use dsp_bridge::{BridgeConfig, ChannelId, Direction, MsgQueueId};
use serde::Deserialize;

use crate::SimError;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    /// Bytes of host memory backing the shared window.
    pub window_len: usize,
    pub config: BridgeConfig,
    pub image: SimImage,
    #[serde(rename = "step")]
    pub steps: Vec<Step>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self { window_len: 0x4000, config: BridgeConfig::default(), image: SimImage::default(), steps: Vec::new() }
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = fs::read_to_string(path).map_err(|source| SimError::Read { path: path.to_path_buf(), source })?;
        Ok(toml::from_str(&text)?)
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dir {
    Input,
    Output,
}

impl From<Dir> for Direction {
    fn from(value: Dir) -> Self {
        match value {
            Dir::Input => Direction::Input,
            Dir::Output => Direction::Output,
        }
    }
}

/// One scripted action. Host-side steps go through the transport API; `dsp-*`
/// steps act on the simulated coprocessor and ring the data doorbell.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    Open { channel: ChannelId, direction: Dir },
    Close { channel: ChannelId },
    /// Queue an input buffer of `capacity` bytes.
    Receive { channel: ChannelId, capacity: usize },
    Transmit {
        channel: ChannelId,
        data: String,
        #[serde(default)]
        arg: u32,
    },
    Cancel { channel: ChannelId },
    Register { queue: MsgQueueId },
    Deregister { queue: MsgQueueId },
    Send {
        queue: MsgQueueId,
        cmd: u32,
        #[serde(default)]
        arg1: u32,
        #[serde(default)]
        arg2: u32,
    },
    DspReady { mask: u32 },
    DspSend {
        channel: ChannelId,
        data: String,
        #[serde(default)]
        arg: u32,
    },
    DspDrain,
    DspPost {
        queue: MsgQueueId,
        cmd: u32,
        #[serde(default)]
        arg1: u32,
        #[serde(default)]
        arg2: u32,
    },
    DspMessages,
    DspTrace { text: String },
    /// Raw mailbox status, e.g. a power request or a fault code.
    Interrupt { status: u16 },
    Reload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps_and_overrides() {
        let scenario: Scenario = toml::from_str(
            r#"
            [config]
            trace = true

            [[step]]
            op = "open"
            channel = 1
            direction = "output"

            [[step]]
            op = "transmit"
            channel = 1
            data = "hello"

            [[step]]
            op = "interrupt"
            status = 0x2a00
            "#,
        )
        .unwrap();
        assert!(scenario.config.trace);
        assert_eq!(scenario.window_len, 0x4000);
        assert_eq!(scenario.steps.len(), 3);
        assert!(matches!(scenario.steps[1], Step::Transmit { channel: 1, arg: 0, .. }));
        assert!(matches!(scenario.steps[2], Step::Interrupt { status: 0x2a00 }));
    }

    #[test]
    fn unknown_op_is_rejected() {
        let parsed: Result<Scenario, _> = toml::from_str("[[step]]\nop = \"explode\"\n");
        assert!(parsed.is_err());
    }
}
