//! Layout checks and flash usage reporting over decoded binary info.
//!
//! Everything here works on a [`ParsedImage`] alone; nothing re-reads the
//! image.

use crate::bininfo::ParsedImage;
use serde::Serialize;
use std::fmt;

/// A block device that starts inside the program binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutViolation {
    pub device: String,
    pub binary_end: u32,
    pub device_start: u32,
}

impl fmt::Display for LayoutViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Binary ends at 0x{:04x}, block device starts at 0x{:04x}",
            self.binary_end, self.device_start
        )
    }
}

/// Check every declared block device against the end of the binary.
///
/// A missing `BinaryEndAddress` counts as 0, so nothing can overlap it.
pub fn verify_layout(parsed: &ParsedImage) -> Vec<LayoutViolation> {
    let binary_end = parsed.binary_end().unwrap_or(0);
    parsed
        .block_devices()
        .into_iter()
        .filter(|bd| bd.address < binary_end)
        .map(|bd| LayoutViolation {
            device: bd.name.clone(),
            binary_end,
            device_start: bd.address,
        })
        .collect()
}

/// One line of the flash usage table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRow {
    pub name: String,
    pub binary_end: u32,
    pub device_start: u32,
    /// Binary size in bytes, taken from the low 24 bits of the end address.
    pub binary_size: u32,
    pub device_size: u32,
    /// Bytes between the end of the binary and the device; negative on overlap.
    pub gap: i64,
}

impl UsageRow {
    /// One row per block device declared in `parsed`.
    pub fn from_parsed(name: &str, parsed: &ParsedImage) -> Vec<UsageRow> {
        let binary_end = parsed.binary_end().unwrap_or(0);
        parsed
            .block_devices()
            .into_iter()
            .map(|bd| UsageRow {
                name: name.to_string(),
                binary_end,
                device_start: bd.address,
                binary_size: binary_end & 0x00FF_FFFF,
                device_size: bd.size,
                gap: bd.address as i64 - binary_end as i64,
            })
            .collect()
    }

    pub fn overlaps(&self) -> bool {
        self.gap <= 0
    }
}

const LABELS: [&str; 6] = [
    "Filename",
    "Binary End",
    "Block Dev Start",
    "Binary Size",
    "Block Dev Size",
    "Usage",
];

fn mib(bytes: u32) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Render rows as a pipe table, sizes in MiB and gaps in KiB.
pub fn render_usage_table(rows: &[UsageRow]) -> String {
    let mut out = LABELS.join(" | ");
    out.push('\n');
    out.push_str(
        &LABELS
            .iter()
            .map(|l| "-".repeat(l.len()))
            .collect::<Vec<_>>()
            .join("-|-"),
    );
    out.push('\n');

    for row in rows {
        let kib = row.gap as f64 / 1024.0;
        let usage = if row.overlaps() {
            format!(":warning: {:.2}K overlap!", kib)
        } else {
            format!("{:.2}K remaining", kib)
        };
        out.push_str(&format!(
            "{} | 0x{:04x} | 0x{:04x} | {:.2}M | {:.2}M | {}\n",
            row.name,
            row.binary_end,
            row.device_start,
            mib(row.binary_size),
            mib(row.device_size),
            usage
        ));
    }
    out
}
