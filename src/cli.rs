//! Command line front end.

use crate::config::DecodeConfig;
use crate::report::{render_usage_table, verify_layout, UsageRow};
use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// File extensions accepted on the command line.
pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["uf2", "bin"];

/// Accept an existing `.uf2` or `.bin` path.
pub fn valid_firmware_path(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if !path.exists() {
        return Err(format!("{} does not exist!", path.display()));
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(format!(".{} format not supported!", ext));
    }
    Ok(path)
}

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser, Debug)]
#[command(name = "picodecl")]
#[command(version, about = "Decode binary info from RP2040/RP2350 firmware", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Decoder configuration (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Only accept UF2 blocks of this family id
    #[arg(long, value_parser = parse_hex_u32)]
    pub family: Option<u32>,

    /// Output data as JSON
    #[arg(long)]
    pub to_json: bool,

    /// Perform basic verification
    #[arg(long)]
    pub verify: bool,

    /// Print a flash usage table
    #[arg(long)]
    pub report: bool,

    /// Files to parse
    #[arg(required = true, value_parser = valid_firmware_path)]
    pub files: Vec<PathBuf>,
}

impl Cli {
    /// Effective decoder configuration: the config file, then flag overrides.
    pub fn decode_config(&self) -> anyhow::Result<DecodeConfig> {
        let mut config = match &self.config {
            Some(path) => DecodeConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => DecodeConfig::default(),
        };
        if self.family.is_some() {
            config.family_id = self.family;
        }
        Ok(config)
    }
}

/// What a run found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub decoded: usize,
    pub failed: usize,
    pub violations: usize,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.violations > 0 {
            1
        } else {
            0
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Decode every file, writing results to `out` and diagnostics to `err`.
///
/// A file that fails to decode is reported and skipped.
pub fn run(cli: &Cli, out: &mut dyn Write, err: &mut dyn Write) -> anyhow::Result<RunSummary> {
    let config = cli.decode_config()?;
    let mut summary = RunSummary::default();
    let mut rows = Vec::new();

    // A report-only run keeps stdout to the table.
    let banner = cli.to_json || cli.verify || !cli.report;
    for path in &cli.files {
        let parsed = match crate::decode_file(path, &config) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to parse");
                writeln!(err, "ERROR: Failed to parse {}", path.display())?;
                summary.failed += 1;
                continue;
            }
        };
        summary.decoded += 1;
        if banner {
            writeln!(out, "Processing: {}", path.display())?;
        }

        if cli.to_json {
            writeln!(out, "{}", parsed.to_json_pretty()?)?;
        }

        if cli.verify {
            for violation in verify_layout(&parsed) {
                writeln!(err, "CRITICAL ERROR: Block device / binary overlap!")?;
                writeln!(err, "{}", violation)?;
                summary.violations += 1;
            }
        }

        if cli.report {
            rows.extend(UsageRow::from_parsed(&file_stem(path), &parsed));
        }
    }

    if cli.report {
        write!(out, "{}", render_usage_table(&rows))?;
    }

    info!(
        decoded = summary.decoded,
        failed = summary.failed,
        violations = summary.violations,
        "Done"
    );
    Ok(summary)
}
