// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Coprocessor-side address translation seam.

use core::fmt;

bitflags::bitflags! {
    /// Attributes of one coprocessor translation entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MapAttrs: u32 {
        const LITTLE_ENDIAN = 1 << 0;
        const BIG_ENDIAN = 1 << 1;
        const ELEM_8 = 1 << 2;
        const ELEM_16 = 1 << 3;
        const ELEM_32 = 1 << 4;
        /// Entry is pinned in the hardware TLB rather than walked from tables.
        const LOCKED = 1 << 5;
    }
}

impl MapAttrs {
    /// Element-size flag for a coprocessor word of `bytes` bytes.
    pub const fn for_word_size(bytes: usize) -> Self {
        match bytes {
            1 => Self::ELEM_8,
            2 => Self::ELEM_16,
            _ => Self::ELEM_32,
        }
    }
}

/// One translation entry: `size` bytes at `host_physical` appear at
/// `target_virtual` (a byte address) in the coprocessor's address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub host_physical: u64,
    pub target_virtual: u64,
    pub size: usize,
    pub attrs: MapAttrs,
}

/// Failure reported by the platform mapper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// Address or size violates the hardware alignment for this entry.
    Misaligned,
    /// The translation table has no room left.
    TableFull,
    /// The platform rejected the request.
    Rejected,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misaligned => write!(f, "misaligned translation entry"),
            Self::TableFull => write!(f, "translation table full"),
            Self::Rejected => write!(f, "mapping rejected by platform"),
        }
    }
}

/// Programs coprocessor-side translation.
pub trait MmuMapper {
    fn map(&self, mapping: &Mapping) -> Result<(), MapError>;

    /// Drops every entry previously installed through this mapper.
    fn unmap_all(&self) {}
}

/// Mapper that records every request; used by host builds and tests.
#[cfg(feature = "std")]
#[derive(Default)]
pub struct RecordingMapper {
    entries: parking_lot::Mutex<alloc::vec::Vec<Mapping>>,
}

#[cfg(feature = "std")]
impl RecordingMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the installed entries in installation order.
    pub fn entries(&self) -> alloc::vec::Vec<Mapping> {
        self.entries.lock().clone()
    }
}

#[cfg(feature = "std")]
impl MmuMapper for RecordingMapper {
    fn map(&self, mapping: &Mapping) -> Result<(), MapError> {
        let misaligned = |v: u64| v % mapping.size as u64 != 0;
        if mapping.size == 0 || misaligned(mapping.host_physical) || misaligned(mapping.target_virtual) {
            return Err(MapError::Misaligned);
        }
        self.entries.lock().push(*mapping);
        Ok(())
    }

    fn unmap_all(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn recording_mapper_rejects_misaligned_entry() {
        let mapper = RecordingMapper::new();
        let bad = Mapping {
            host_physical: 0x8000_1000,
            target_virtual: 0x1000_0000,
            size: 0x10000,
            attrs: MapAttrs::LITTLE_ENDIAN,
        };
        assert_eq!(mapper.map(&bad), Err(MapError::Misaligned));
        assert!(mapper.entries().is_empty());
    }

    #[test]
    fn unmap_all_clears_entries() {
        let mapper = RecordingMapper::new();
        let ok = Mapping {
            host_physical: 0x8000_0000,
            target_virtual: 0x1000_0000,
            size: 0x1000,
            attrs: MapAttrs::LITTLE_ENDIAN | MapAttrs::ELEM_16 | MapAttrs::LOCKED,
        };
        mapper.map(&ok).unwrap();
        assert_eq!(mapper.entries(), vec![ok]);
        mapper.unmap_all();
        assert!(mapper.entries().is_empty());
    }

    #[test]
    fn word_size_selects_element_flag() {
        assert_eq!(MapAttrs::for_word_size(2), MapAttrs::ELEM_16);
        assert_eq!(MapAttrs::for_word_size(4), MapAttrs::ELEM_32);
    }
}
