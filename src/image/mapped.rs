//! RAM-to-flash address translation.
//!
//! Initialised data lives in flash but is copied to RAM at boot, so pointers
//! inside binary info records may name the RAM copy. The binary info header
//! references a table describing those copies; [`MappedImage`] rewrites RAM
//! addresses back to their flash load address before reading.

use crate::error::Result;
use crate::image::{AddressableImage, Span};
use serde::Serialize;
use std::borrow::Cow;

/// One copied region: `[dest_start, dest_end)` in RAM is loaded from `source_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub source_start: u32,
    pub dest_start: u32,
    pub dest_end: u32,
}

impl MappingEntry {
    fn translate(&self, address: u32) -> Option<u32> {
        if address >= self.dest_start && address < self.dest_end {
            self.source_start.checked_add(address - self.dest_start)
        } else {
            None
        }
    }
}

/// Ordered list of copied regions; the first match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddressMap {
    entries: Vec<MappingEntry>,
}

impl AddressMap {
    pub fn new(entries: Vec<MappingEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The address to read instead of `address`.
    pub fn translate(&self, address: u32) -> u32 {
        self.entries
            .iter()
            .find_map(|e| e.translate(address))
            .unwrap_or(address)
    }
}

/// An image view that applies an [`AddressMap`] to every read.
pub struct MappedImage<'a> {
    inner: &'a dyn AddressableImage,
    map: &'a AddressMap,
}

impl<'a> MappedImage<'a> {
    pub fn new(inner: &'a dyn AddressableImage, map: &'a AddressMap) -> Self {
        Self { inner, map }
    }
}

impl AddressableImage for MappedImage<'_> {
    fn read(&self, address: u32, len: usize) -> Result<Cow<'_, [u8]>> {
        self.inner.read(self.map.translate(address), len)
    }

    fn spans(&self) -> Vec<Span> {
        self.inner.spans()
    }
}
