//! Decoder for the binary info metadata embedded in RP2040/RP2350 firmware.
//!
//! Firmware built with the Pico SDK or MicroPython carries a table of typed
//! records describing the program: name, version, board, block devices and
//! grouped build features. This crate finds that table inside a flat `.bin`
//! or a UF2 container and turns it into a keyed, serializable result.
//!
//! ```no_run
//! let parsed = picodecl::decode_file("firmware.uf2", &picodecl::DecodeConfig::default())?;
//! println!("{:?}", parsed.program_name());
//! # Ok::<(), picodecl::DeclError>(())
//! ```

pub mod bininfo;
pub mod builder;
pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod io;
pub mod logging;
pub mod report;

pub use bininfo::{BlockDevice, EntryValue, Key, NamedGroup, ParsedImage, SkipReason, Slot};
pub use config::DecodeConfig;
pub use error::{DeclError, Result};
pub use image::{AddressableImage, ContainerKind, FirmwareImage};

use bytes::Bytes;
use std::path::Path;
use tracing::info_span;

/// Decode raw file contents with the default configuration.
pub fn decode(data: impl Into<Bytes>) -> Result<ParsedImage> {
    decode_with_config(data, &DecodeConfig::default())
}

/// Decode raw file contents, detecting flat or UF2 from the leading bytes.
pub fn decode_with_config(data: impl Into<Bytes>, config: &DecodeConfig) -> Result<ParsedImage> {
    let image = FirmwareImage::from_bytes(data, config);
    let mut parsed = bininfo::parse(&image, config)?;
    parsed.container = Some(image.kind());
    Ok(parsed)
}

/// Decode any addressable image, e.g. a reader over a live device's memory.
pub fn decode_image(image: &dyn AddressableImage, config: &DecodeConfig) -> Result<ParsedImage> {
    bininfo::parse(image, config)
}

/// Read a firmware file within the configured limits and decode it.
pub fn decode_file<P: AsRef<Path>>(path: P, config: &DecodeConfig) -> Result<ParsedImage> {
    let path = path.as_ref();
    let _span = info_span!("decode_file", path = %path.display()).entered();
    let data = io::read_firmware(path, &config.io)?;
    decode_with_config(data, config)
}
