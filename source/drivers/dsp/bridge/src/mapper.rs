// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared-region discovery and coprocessor-side mapping.
//!
//! Runs once per image load: resolves the window symbols, validates them,
//! checks the reserved host window is large enough and installs translation
//! entries so the coprocessor sees the window at its dynamic-segment base.

use bridge_hal::{MapAttrs, Mapping, MmuMapper};
use log::{debug, info};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::layout::{ChannelRegion, MsgRegion, TraceRegion};
use crate::symbols::{self, SymbolTable};

/// Physically contiguous host memory reserved for the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostWindow {
    pub host_physical: u64,
    pub len: usize,
}

/// Result of a successful image load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedRegions {
    pub channel: ChannelRegion,
    pub message: MsgRegion,
    pub trace: Option<TraceRegion>,
    /// Coprocessor word address of the first byte of the host window.
    pub dsp_base: u32,
    pub word_size: usize,
    pub host_physical: u64,
    /// Bytes of the window covered by translation entries.
    pub mapped_len: usize,
    pub entries: usize,
}

impl SharedRegions {
    /// Byte offset of a coprocessor word address, if it lies in the mapped window.
    pub fn offset_of(&self, dsp_addr: u32) -> Option<usize> {
        let words = dsp_addr.checked_sub(self.dsp_base)? as usize;
        let offset = words * self.word_size;
        (offset < self.mapped_len).then_some(offset)
    }
}

#[derive(Clone, Copy, Debug)]
struct Span {
    begin: u32,
    end: u32,
}

impl Span {
    fn resolve(table: &dyn SymbolTable, base: &str, limit: &str, dynext: u32) -> Result<Self> {
        let begin = table.require(base)?;
        let end = table.require(limit)?;
        if end <= begin {
            return Err(Error::Config(format!("{limit} ({end:#x}) is not above {base} ({begin:#x})")));
        }
        if begin < dynext {
            return Err(Error::Config(format!("{base} ({begin:#x}) lies below the dynamic segment")));
        }
        Ok(Self { begin, end })
    }

    fn overlaps(&self, other: &Span) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

/// Locates the channel, message and (when enabled) trace windows, validates
/// them against `window`, and maps the window for the coprocessor.
///
/// On failure nothing stays mapped.
pub fn map_shared_regions(
    table: &dyn SymbolTable,
    window: &HostWindow,
    mmu: &dyn MmuMapper,
    config: &BridgeConfig,
) -> Result<SharedRegions> {
    let word = config.word_size;
    let dynext = table.require(symbols::DYNEXT_BASE)?;
    let chnl = Span::resolve(table, symbols::SHM_BASE, symbols::SHM_LIMIT, dynext)?;
    let msg = Span::resolve(table, symbols::MSG_BASE, symbols::MSG_LIMIT, dynext)?;
    if chnl.overlaps(&msg) {
        return Err(Error::Config(format!(
            "channel window [{:#x}, {:#x}) overlaps message window [{:#x}, {:#x})",
            chnl.begin, chnl.end, msg.begin, msg.end
        )));
    }
    let trace = if config.trace {
        let span = Span::resolve(table, symbols::TRACE_BASE, symbols::TRACE_LIMIT, dynext)?;
        let writer = table.require(symbols::TRACE_WRITER)?;
        if writer < dynext {
            return Err(Error::Config(format!("{} lies below the dynamic segment", symbols::TRACE_WRITER)));
        }
        Some((span, writer))
    } else {
        None
    };

    let offset = |addr: u32| (addr - dynext) as usize * word;
    let mut end = offset(chnl.end).max(offset(msg.end));
    if let Some((span, writer)) = &trace {
        end = end.max(offset(span.end)).max(offset(*writer) + 4);
    }
    let min_page = config.min_page() as usize;
    let required = end.div_ceil(min_page) * min_page;
    if required > window.len {
        return Err(Error::InsufficientMemory { required, available: window.len });
    }

    for (name, base) in [(symbols::SHM_BASE, offset(chnl.begin)), (symbols::MSG_BASE, offset(msg.begin))] {
        if base % 4 != 0 {
            return Err(Error::Config(format!("{name} is not word aligned")));
        }
    }
    let channel = ChannelRegion::split(offset(chnl.begin), offset(chnl.end) - offset(chnl.begin))
        .ok_or_else(|| Error::Config("channel window cannot hold two slots".into()))?;
    let message = MsgRegion::split(offset(msg.begin), offset(msg.end) - offset(msg.begin))
        .ok_or_else(|| Error::Config("message window cannot hold a record per direction".into()))?;
    let trace = match trace {
        Some((span, writer)) => {
            if offset(writer) % 4 != 0 {
                return Err(Error::Config(format!("{} is not word aligned", symbols::TRACE_WRITER)));
            }
            Some(TraceRegion { begin: offset(span.begin), end: offset(span.end), writer: offset(writer) })
        }
        None => None,
    };

    let target_virtual = u64::from(dynext) * word as u64;
    let entries = install(mmu, window.host_physical, target_virtual, required, config)?;
    info!(
        "dsp-bridge: mapped {required:#x} bytes at pa {:#x} -> dsp va {target_virtual:#x} ({entries} entries)",
        window.host_physical
    );
    Ok(SharedRegions {
        channel,
        message,
        trace,
        dsp_base: dynext,
        word_size: word,
        host_physical: window.host_physical,
        mapped_len: required,
        entries,
    })
}

/// Covers `len` bytes with the largest pages both addresses are aligned to.
/// Once `tlb_entries` pinned entries are used, the remainder is mapped in
/// unpinned entries of the smallest page size.
fn install(mmu: &dyn MmuMapper, pa: u64, va: u64, len: usize, config: &BridgeConfig) -> Result<usize> {
    let min_page = config.min_page();
    if pa % min_page != 0 || va % min_page != 0 {
        return Err(Error::Config(format!("window pa {pa:#x} / va {va:#x} not aligned to {min_page:#x}")));
    }
    let attrs = MapAttrs::LITTLE_ENDIAN | MapAttrs::for_word_size(config.word_size);
    let len = len as u64;
    let mut done = 0u64;
    let mut entries = 0usize;
    while done < len {
        let (host_physical, target_virtual) = (pa + done, va + done);
        let remaining = len - done;
        let (size, pin) = if entries < config.tlb_entries {
            let size = config
                .page_sizes
                .iter()
                .copied()
                .find(|page| *page <= remaining && host_physical % page == 0 && target_virtual % page == 0)
                .unwrap_or(min_page);
            (size, MapAttrs::LOCKED)
        } else {
            (min_page, MapAttrs::empty())
        };
        let mapping = Mapping { host_physical, target_virtual, size: size as usize, attrs: attrs | pin };
        if let Err(err) = mmu.map(&mapping) {
            mmu.unmap_all();
            return Err(err.into());
        }
        debug!("dsp-bridge: map {host_physical:#x} -> {target_virtual:#x} size {size:#x} {:?}", mapping.attrs);
        done += size;
        entries += 1;
    }
    Ok(entries)
}
