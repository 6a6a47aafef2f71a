//! Configuration for the decoder.
//!
//! Every knob has a default matching the RP2040/RP2350 memory map, so most
//! callers use `DecodeConfig::default()`. Configurations can also be loaded
//! from JSON; fields that are absent keep their defaults.

use crate::error::{DeclError, Result};
use crate::io::IOLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// XIP flash base of the RP2040/RP2350 address space.
pub const FLASH_BASE: u32 = 0x1000_0000;

/// Default upper bound for null-terminated string reads.
pub const DEFAULT_MAX_STRING_LEN: usize = 512;

/// Default window size for the header magic scan.
pub const DEFAULT_SCAN_WINDOW: usize = 64 * 1024;

/// Master configuration for decoding an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// I/O limits applied when decoding from a file.
    pub io: IOLimits,
    /// Address of the first byte of a flat binary image.
    pub flash_base: u32,
    /// Maximum bytes scanned for a string terminator.
    pub max_string_len: usize,
    /// Bytes read per step while scanning for the header magic.
    pub scan_window: usize,
    /// Two-character source tags whose entries are decoded.
    pub source_tags: Vec<String>,
    /// Only keep UF2 blocks that declare this family id.
    pub family_id: Option<u32>,
    /// Translate RAM addresses through the header's mapping table.
    pub follow_mapping_table: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            io: IOLimits::default(),
            flash_base: FLASH_BASE,
            max_string_len: DEFAULT_MAX_STRING_LEN,
            scan_window: DEFAULT_SCAN_WINDOW,
            source_tags: vec!["RP".to_string(), "MP".to_string()],
            family_id: None,
            follow_mapping_table: true,
        }
    }
}

impl DecodeConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DeclError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| DeclError::Config(e.to_string()))
    }

    /// Whether entries with this source tag should be decoded.
    pub fn accepts_source_tag(&self, tag: [u8; 2]) -> bool {
        self.source_tags.iter().any(|t| t.as_bytes() == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = DecodeConfig::default();
        assert_eq!(cfg.flash_base, 0x1000_0000);
        assert_eq!(cfg.max_string_len, 512);
        assert!(cfg.follow_mapping_table);
        assert!(cfg.family_id.is_none());
        assert!(cfg.accepts_source_tag(*b"RP"));
        assert!(cfg.accepts_source_tag(*b"MP"));
        assert!(!cfg.accepts_source_tag(*b"JP"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = DecodeConfig::from_json_str(
            r#"{ "max_string_len": 64, "family_id": 3834380118, "io": {} }"#,
        )
        .unwrap();
        assert_eq!(cfg.max_string_len, 64);
        assert_eq!(cfg.family_id, Some(0xe48b_ff56));
        assert_eq!(cfg.flash_base, FLASH_BASE);
        assert_eq!(cfg.io, IOLimits::default());
        assert_eq!(cfg.source_tags, vec!["RP", "MP"]);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = DecodeConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, DeclError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = DecodeConfig::from_json_file("/nonexistent/picodecl.json").unwrap_err();
        assert!(matches!(err, DeclError::Config(_)));
    }
}
