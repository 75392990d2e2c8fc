//! Storage error types.

use flim_core::FlimError;
use std::path::PathBuf;
use thiserror::Error;

/// Container could not be parsed. Fatal at open time.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bad magic number {found:#010x}, expected {expected:#010x}")]
    BadMagic { found: u32, expected: u32 },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("truncated header: {0}")]
    TruncatedHeader(String),

    #[error("invalid tag '{name}': {reason}")]
    InvalidTag { name: String, reason: String },

    #[error("missing required tag '{0}'")]
    MissingTag(&'static str),

    #[error("corrupt compressed frame: {0}")]
    CorruptFrame(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Recording failed. Never affects the live acquisition path.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("write to {path} failed: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Nothing reached the disk, usually because it is full.
    #[error("{0} is empty after closing")]
    EmptyFile(PathBuf),

    #[error("compression writer failed: {0}")]
    Writer(String),
}

impl From<FormatError> for FlimError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Io(e) => FlimError::Io(e),
            other => FlimError::Format(other.to_string()),
        }
    }
}

impl From<RecordingError> for FlimError {
    fn from(err: RecordingError) -> Self {
        FlimError::Recording(err.to_string())
    }
}
