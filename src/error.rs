//! Error types for loading and querying normalized worm data.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::matfile::MatError;

/// Errors raised while loading a normalized worm or querying its fields.
#[derive(Error, Debug)]
pub enum WormError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to decode MAT file '{path}': {source}")]
    Mat {
        path: PathBuf,
        #[source]
        source: MatError,
    },

    #[error("structured record '{0}' not found in data file")]
    MissingRecord(String),

    #[error("variable '{name}' not found in '{path}'")]
    MissingVariable { name: String, path: PathBuf },

    #[error("field '{0}' not found in structured record")]
    MissingField(String),

    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("field '{field}' has {found} frames, expected {expected}")]
    FrameCountMismatch {
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("unknown partition: {0}")]
    UnknownPartition(String),

    #[error("unknown partition subset: {0}")]
    UnknownSubset(String),

    #[error("invalid spatial axis {0}, expected 0 (x) or 1 (y)")]
    InvalidAxis(usize),

    #[error("field '{field}' has shape {found}, expected {expected}")]
    ShapeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("failed to read frame code table: {0}")]
    FrameCodes(#[from] csv::Error),

    #[error("invalid frame code '{value}' on line {line}")]
    InvalidFrameCode { line: u64, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for normalized worm operations.
pub type Result<T> = std::result::Result<T, WormError>;

impl WormError {
    pub(crate) fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        WormError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
