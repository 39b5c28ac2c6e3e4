// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Coprocessor image symbol lookup.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Base of the dynamic segment the host window is mapped at.
pub const DYNEXT_BASE: &str = "_DYNEXT_BEG";
pub const SHM_BASE: &str = "_SHM_BEG";
pub const SHM_LIMIT: &str = "_SHM_END";
pub const MSG_BASE: &str = "_MSG_BEG";
pub const MSG_LIMIT: &str = "_MSG_END";
pub const TRACE_BASE: &str = "_SYS_PUTCBEG";
pub const TRACE_LIMIT: &str = "_SYS_PUTCEND";
/// Word holding the firmware's current trace write address.
pub const TRACE_WRITER: &str = "_BRIDGE_SYS_PUTC_current";

/// Read-only name -> word lookup over a loaded coprocessor image.
/// Values are coprocessor word addresses.
pub trait SymbolTable {
    fn lookup(&self, name: &str) -> Option<u32>;

    fn require(&self, name: &str) -> Result<u32> {
        self.lookup(name).ok_or_else(|| Error::Symbol(name.to_string()))
    }
}

/// Symbol table held in memory, e.g. parsed from an image by the loader.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticSymbols {
    values: HashMap<String, u32>,
}

impl StaticSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: u32) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: u32) {
        self.values.insert(name.to_string(), value);
    }
}

impl SymbolTable for StaticSymbols {
    fn lookup(&self, name: &str) -> Option<u32> {
        self.values.get(name).copied()
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for StaticSymbols {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        Self { values: iter.into_iter().map(|(name, value)| (name.into(), value)).collect() }
    }
}
