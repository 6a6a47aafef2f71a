//! Bounded file access for firmware images.
//!
//! Firmware files are memory-mapped read-only and the mapping itself becomes
//! the owner of a reference-counted `Bytes` buffer, so the image layer
//! slices file contents without copying them. A size limit guards against
//! feeding the decoder arbitrarily large inputs.

pub mod error;

use crate::io::error::{IoError, Result};
use bytes::Bytes;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Defines the resource limits for reading firmware files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            // Largest RP2350 flash is 16MB; a UF2 of it is roughly twice that.
            max_file_size: 64 * 1024 * 1024,
        }
    }
}

/// A read-only, memory-mapped firmware file.
pub struct FirmwareFile {
    path: PathBuf,
    // None when the file size is zero; memmap cannot map empty files.
    mmap: Option<Mmap>,
    file_size: u64,
}

impl FirmwareFile {
    /// Opens and maps a file, failing if it exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Opening firmware file"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "Firmware file is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        let mmap = if file_size == 0 {
            None
        } else {
            // Safety: read-only map of a regular file that we do not modify.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            file_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the total size of the underlying file in bytes.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Hands the mapping to a `Bytes` buffer; it is unmapped when the last
    /// clone or slice is dropped.
    pub fn into_bytes(self) -> Bytes {
        match self.mmap {
            Some(m) => Bytes::from_owner(m),
            None => Bytes::new(),
        }
    }
}

/// Reads a whole firmware file under the given limits.
pub fn read_firmware<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Bytes> {
    Ok(FirmwareFile::open(path, limits)?.into_bytes())
}
