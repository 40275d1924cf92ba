//! Error types for payload construction and validation
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Errors raised while building or validating bus payloads
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("Invalid ticker: {0}")]
    InvalidTicker(String),

    #[error("Unsupported interval: {0}")]
    UnsupportedInterval(String),

    #[error("Invalid day count {days}: must be within 1..={max}")]
    InvalidDays { days: i64, max: u32 },

    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),
}

/// Chunk reassembly errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("No chunks supplied")]
    Empty,

    #[error("Chunk size must be positive")]
    ZeroChunkSize,

    #[error("Missing chunk {index} of {total}")]
    Missing { index: u32, total: u32 },

    #[error("Duplicate chunk {index}")]
    Duplicate { index: u32 },

    #[error("Chunk {index} declares total {declared}, expected {expected}")]
    InconsistentTotal { index: u32, declared: u32, expected: u32 },

    #[error("Chunk index {index} out of range 1..={total}")]
    OutOfRange { index: u32, total: u32 },
}
