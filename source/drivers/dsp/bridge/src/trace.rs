// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Firmware trace buffer reader.
//!
//! The coprocessor writes text into a circular region and publishes its write
//! position; the host remembers where it last read and copies whatever lies
//! in between, in two pieces when the writer has wrapped.

use bridge_hal::Bus;
use log::{info, warn};

use crate::layout::TraceRegion;

pub struct TraceExtractor {
    region: TraceRegion,
    /// Coprocessor word address of the window start.
    dsp_base: u32,
    word_size: usize,
    last_read: usize,
    partial: Vec<u8>,
}

impl TraceExtractor {
    pub fn new(region: TraceRegion, dsp_base: u32, word_size: usize) -> Self {
        Self { region, dsp_base, word_size, last_read: region.begin, partial: Vec::new() }
    }

    fn writer_offset(&self, bus: &dyn Bus) -> Option<usize> {
        let words = bus.read(self.region.writer).checked_sub(self.dsp_base)? as usize;
        let offset = words * self.word_size;
        (self.region.begin..=self.region.end).contains(&offset).then_some(offset)
    }

    /// Copies new trace bytes and returns the complete lines among them. A
    /// trailing partial line is kept for the next call.
    pub fn drain(&mut self, bus: &dyn Bus) -> Vec<String> {
        let Some(writer) = self.writer_offset(bus) else {
            warn!("dsp-bridge: trace write pointer outside trace buffer");
            return Vec::new();
        };
        let writer = if writer == self.region.end { self.region.begin } else { writer };
        if writer == self.last_read {
            return Vec::new();
        }
        if writer > self.last_read {
            self.copy(bus, self.last_read, writer);
        } else {
            self.copy(bus, self.last_read, self.region.end);
            self.copy(bus, self.region.begin, writer);
        }
        self.last_read = writer;
        self.take_lines()
    }

    /// Drains and logs each line at info level. Returns the line count.
    pub fn log(&mut self, bus: &dyn Bus) -> usize {
        let lines = self.drain(bus);
        for line in &lines {
            info!("dsp-bridge: DSP> {line}");
        }
        lines.len()
    }

    fn copy(&mut self, bus: &dyn Bus, from: usize, to: usize) {
        let start = self.partial.len();
        self.partial.resize(start + (to - from), 0);
        bus.read_bytes(from, &mut self.partial[start..]);
    }

    fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(end) = self.partial.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=end).collect();
            lines.push(printable(&raw[..end]));
        }
        // A line never outgrows the buffer it was written into.
        if self.partial.len() >= self.region.end - self.region.begin {
            lines.push(printable(&self.partial));
            self.partial.clear();
        }
        lines
    }
}

fn printable(raw: &[u8]) -> String {
    let text: Vec<u8> = raw.iter().copied().filter(|byte| *byte != 0 && *byte != b'\r').collect();
    String::from_utf8_lossy(&text).into_owned()
}
