//! Error types for vidconvert-media.

use std::io;
use thiserror::Error;

/// Result type for vidconvert-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for vidconvert-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid MP4 file structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Missing required atom in MP4 file.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Buffer too small for operation.
    #[error("Buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },

    /// Track index out of range.
    #[error("Invalid track index: {index} (tracks: {count})")]
    InvalidTrack { index: usize, count: usize },

    /// Writer used out of order (e.g. a sample for an unregistered track).
    #[error("Writer state: {0}")]
    WriterState(String),
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a writer state error.
    pub fn writer_state(msg: impl Into<String>) -> Self {
        Self::WriterState(msg.into())
    }
}
