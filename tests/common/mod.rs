//! Common test utilities and helpers.
#![allow(dead_code)]

use picodecl::bininfo::types::*;
use picodecl::builder::BinaryInfoBuilder;
use std::path::PathBuf;
use tempfile::TempDir;

pub const FLASH_BASE: u32 = 0x1000_0000;

/// Binary info as the Pico SDK emits it for a typical application.
pub fn sdk_builder() -> BinaryInfoBuilder {
    BinaryInfoBuilder::new()
        .id_and_string(ID_PROGRAM_NAME, "blink")
        .id_and_string(ID_PROGRAM_VERSION_STRING, "1.2.0")
        .id_and_string(ID_PICO_BOARD, "pico")
        .id_and_string(ID_SDK_VERSION, "2.0.0")
        .id_and_string(ID_BOOT2_NAME, "boot2_w25q080")
        .id_and_int(ID_BINARY_END, 0x1000_7a3c)
        .id_and_string(ID_PROGRAM_FEATURE, "UART stdin / stdout")
}

/// Binary info as a MicroPython port emits it: block device and module group.
pub fn micropython_builder(binary_end: u32, fs_start: u32) -> BinaryInfoBuilder {
    BinaryInfoBuilder::new()
        .id_and_string(ID_PROGRAM_NAME, "MicroPython")
        .id_and_int(ID_BINARY_END, binary_end)
        .block_device("rp2 flash", fs_start, 0x10_0000, 0x0003)
        .named_group(0, 0x0001, u16::from_le_bytes(TAG_MICROPYTHON), ID_MP_BUILTIN_MODULE, "modules")
        .with_source_tag(TAG_MICROPYTHON)
        .id_and_string(ID_MP_BUILTIN_MODULE, "machine")
        .id_and_string(ID_MP_BUILTIN_MODULE, "network")
        .id_and_string(ID_MP_BUILTIN_MODULE, "rp2")
}

/// Writes `content` to `<name>` in a fresh temporary directory.
///
/// The directory is removed when the returned `TempDir` is dropped.
pub fn temp_firmware(name: &str, content: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

/// Byte offset of UF2 block `index`.
pub fn block_offset(index: usize) -> usize {
    index * 512
}
