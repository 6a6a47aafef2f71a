//! Address-based reads over firmware images.
//!
//! Binary info records point at each other with absolute addresses in the
//! target's memory map. [`AddressableImage`] hides how such an address is
//! found in the input: a flat binary is a plain offset from the flash base,
//! while a UF2 container scatters the image over independently addressed
//! blocks. Implementations must return exactly the requested number of bytes
//! or fail with [`DeclError::OutOfRange`]; partial reads never escape.
//!
//! A reader for the memory of a running device can plug into the decoder by
//! implementing the same trait.

pub mod flat;
pub mod mapped;
pub mod uf2;

use crate::config::DecodeConfig;
use crate::error::{DeclError, Result};
use bytes::Bytes;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

pub use flat::FlatImage;
pub use mapped::{AddressMap, MappedImage, MappingEntry};
pub use uf2::Uf2Image;

/// A contiguous run of mapped addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub len: usize,
}

impl Span {
    /// One past the last address, widened so a span ending at 4GiB is representable.
    pub fn end(&self) -> u64 {
        self.start as u64 + self.len as u64
    }
}

/// Bounded memory reads by absolute address.
pub trait AddressableImage {
    /// Read exactly `len` bytes starting at `address`.
    fn read(&self, address: u32, len: usize) -> Result<Cow<'_, [u8]>>;

    /// Address ranges that can be read, in ascending order.
    fn spans(&self) -> Vec<Span>;

    /// Convenience: read a little-endian u16.
    fn read_u16(&self, address: u32) -> Result<u16> {
        let b = self.read(address, 2)?;
        Ok(le_u16(&b, 0))
    }

    /// Convenience: read a little-endian u32.
    fn read_u32(&self, address: u32) -> Result<u32> {
        let b = self.read(address, 4)?;
        Ok(le_u32(&b, 0))
    }

    /// Read a NUL-terminated UTF-8 string of at most `max_len` bytes.
    ///
    /// Reads one byte at a time so a string ending right before a hole in
    /// the image still resolves.
    fn read_cstring(&self, address: u32, max_len: usize) -> Result<String> {
        let mut buf = Vec::new();
        for i in 0..max_len {
            let addr = u32::try_from(i)
                .ok()
                .and_then(|i| address.checked_add(i))
                .ok_or(DeclError::OutOfRange { address, len: i + 1 })?;
            let byte = self.read(addr, 1)?[0];
            if byte == 0 {
                return String::from_utf8(buf).map_err(|_| DeclError::InvalidString { address });
            }
            buf.push(byte);
        }
        Err(DeclError::StringUnterminated { address, max_len })
    }
}

/// Container format an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerKind {
    Flat,
    Uf2,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Flat => write!(f, "flat"),
            ContainerKind::Uf2 => write!(f, "uf2"),
        }
    }
}

/// A firmware image in one of the supported container formats.
pub enum FirmwareImage {
    Flat(FlatImage),
    Uf2(Uf2Image),
}

impl FirmwareImage {
    /// Wraps raw file contents, picking the container from the leading magic.
    pub fn from_bytes(data: impl Into<Bytes>, config: &DecodeConfig) -> Self {
        let data = data.into();
        if uf2::is_uf2(&data) {
            FirmwareImage::Uf2(Uf2Image::parse(data, config.family_id))
        } else {
            FirmwareImage::Flat(FlatImage::new(data, config.flash_base))
        }
    }

    pub fn kind(&self) -> ContainerKind {
        match self {
            FirmwareImage::Flat(_) => ContainerKind::Flat,
            FirmwareImage::Uf2(_) => ContainerKind::Uf2,
        }
    }
}

impl AddressableImage for FirmwareImage {
    fn read(&self, address: u32, len: usize) -> Result<Cow<'_, [u8]>> {
        match self {
            FirmwareImage::Flat(img) => img.read(address, len),
            FirmwareImage::Uf2(img) => img.read(address, len),
        }
    }

    fn spans(&self) -> Vec<Span> {
        match self {
            FirmwareImage::Flat(img) => img.spans(),
            FirmwareImage::Uf2(img) => img.spans(),
        }
    }
}

/// Little-endian u16 at `offset`; the caller guarantees the bytes exist.
pub(crate) fn le_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Little-endian u32 at `offset`; the caller guarantees the bytes exist.
pub(crate) fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
