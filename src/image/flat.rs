//! Flat binary images: the image is a byte-for-byte copy of flash.

use crate::error::{DeclError, Result};
use crate::image::{AddressableImage, Span};
use bytes::Bytes;
use std::borrow::Cow;

/// A raw binary loaded at a fixed base address.
pub struct FlatImage {
    data: Bytes,
    base: u32,
}

impl FlatImage {
    pub fn new(data: impl Into<Bytes>, base: u32) -> Self {
        Self {
            data: data.into(),
            base,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Translate an absolute address to a buffer offset.
    pub fn offset_of(&self, address: u32) -> Option<usize> {
        address.checked_sub(self.base).map(|o| o as usize)
    }
}

impl AddressableImage for FlatImage {
    fn read(&self, address: u32, len: usize) -> Result<Cow<'_, [u8]>> {
        let range = self
            .offset_of(address)
            .and_then(|start| start.checked_add(len).map(|end| (start, end)))
            .filter(|&(_, end)| end <= self.data.len());
        let Some((start, end)) = range else {
            return Err(DeclError::OutOfRange { address, len });
        };
        tracing::trace!(address, len, "flat read");
        Ok(Cow::Borrowed(&self.data[start..end]))
    }

    fn spans(&self) -> Vec<Span> {
        if self.data.is_empty() {
            return Vec::new();
        }
        vec![Span {
            start: self.base,
            len: self.data.len(),
        }]
    }
}
