//! Error types for the picodecl binary info decoder.
//!
//! Errors are split by how far they propagate: header-level errors abort the
//! decode of a whole image, while string and range errors raised while
//! decoding a single entry only drop that entry.

use crate::io::error::IoError;
use thiserror::Error;

/// Main error type for decoding operations.
#[derive(Debug, Error)]
pub enum DeclError {
    /// A read touched an address that the image does not map
    #[error("Address range {address:#010x}+{len} is outside the image")]
    OutOfRange { address: u32, len: usize },

    /// No binary info magic anywhere in the image
    #[error("Binary info header not found")]
    HeaderNotFound,

    /// Magic found but the header that follows is not well formed
    #[error("Malformed binary info header at {address:#010x}: {reason}")]
    HeaderMalformed { address: u32, reason: String },

    /// Entry table bounds are inverted or not word aligned
    #[error("Invalid entry table range {start:#010x}..{end:#010x}")]
    InvalidRange { start: u32, end: u32 },

    /// No NUL terminator within the configured maximum
    #[error("String at {address:#010x} not terminated within {max_len} bytes")]
    StringUnterminated { address: u32, max_len: usize },

    #[error("String at {address:#010x} is not valid UTF-8")]
    InvalidString { address: u32 },

    /// File access errors
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for decoder operations
pub type Result<T> = std::result::Result<T, DeclError>;
