//! Error types for fio
//!
//! Every failure in the crate is recoverable by the caller. Structural
//! decode failures carry the byte offset of the first inconsistency and the
//! number of rows decoded before it, so partial results can be kept.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::registry::FormatId;

/// Main error type for fio operations
#[derive(Error, Debug)]
pub enum FioError {
    /// The source path does not exist
    #[error("Source not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The source exists but cannot be opened
    #[error("Permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    /// No registered codec recognised the source
    #[error("Unrecognized format: no registered codec matches the source")]
    UnrecognizedFormat,

    /// The requested format id is not registered
    #[error("Unknown format: {0}")]
    UnknownFormat(FormatId),

    /// The format id is already bound to a codec
    #[error("Format already registered: {0}")]
    DuplicateFormat(FormatId),

    /// Structural validation failed while decoding
    #[error("Corrupt data at byte {offset}: {message} ({rows_decoded} rows decoded)")]
    CorruptData {
        offset: u64,
        message: String,
        rows_decoded: usize,
    },

    /// A native type has no counterpart in the table type set (or the reverse)
    #[error("Unsupported type for {format}: {native}")]
    UnsupportedType { format: String, native: String },

    /// Table construction invariant violated
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Seek or index beyond the known bounds
    #[error("Out of range: index {index}, length {len}")]
    OutOfRange { index: u64, len: u64 },

    /// Column selection named a column the table does not have
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Encode requested on a codec that only decodes
    #[error("Format {0} is read-only")]
    ReadOnlyFormat(String),

    /// Write requested on a source opened for reading
    #[error("Byte source is not writable")]
    NotWritable,

    /// Read requested on a write-only source
    #[error("Byte source is not readable")]
    NotReadable,

    /// Options failed validation
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for fio operations
pub type Result<T> = std::result::Result<T, FioError>;

impl FioError {
    /// Build a `CorruptData` error with no rows decoded yet
    pub fn corrupt(offset: u64, message: impl Into<String>) -> Self {
        FioError::CorruptData {
            offset,
            message: message.into(),
            rows_decoded: 0,
        }
    }

    /// Build an `UnsupportedType` error
    pub fn unsupported(format: impl Into<String>, native: impl Into<String>) -> Self {
        FioError::UnsupportedType {
            format: format.into(),
            native: native.into(),
        }
    }

    /// Attach partial progress to a `CorruptData` error; other variants pass through.
    pub fn with_rows_decoded(self, rows: usize) -> Self {
        match self {
            FioError::CorruptData {
                offset, message, ..
            } => FioError::CorruptData {
                offset,
                message,
                rows_decoded: rows,
            },
            other => other,
        }
    }

    /// Rows decoded before a `CorruptData` failure
    pub fn rows_decoded(&self) -> Option<usize> {
        match self {
            FioError::CorruptData { rows_decoded, .. } => Some(*rows_decoded),
            _ => None,
        }
    }

    /// Byte offset of a `CorruptData` failure
    pub fn offset(&self) -> Option<u64> {
        match self {
            FioError::CorruptData { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Map an open failure to the access taxonomy
    pub(crate) fn from_open(err: std::io::Error, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FioError::NotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => FioError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => FioError::Io(err),
        }
    }
}
