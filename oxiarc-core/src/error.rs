//! Error types for OxiArc operations.
//!
//! Every malformed-input condition a codec can detect maps onto one variant of
//! [`OxiArcError`]. Recoverable conditions such as "need more input" or "need
//! more output room" are not errors; they are reported through the status
//! enums in [`crate::traits`].

use thiserror::Error;

/// The main error type for OxiArc operations.
#[derive(Debug, Error)]
pub enum OxiArcError {
    /// Unknown block magic in a compressed stream.
    #[error("Invalid block magic {magic:#010x} at offset {offset}")]
    InvalidMagic {
        /// The magic value that was read (little-endian u32).
        magic: u32,
        /// Byte offset of the magic in the source.
        offset: u64,
    },

    /// Invalid header format.
    #[error("Invalid header: {message}")]
    InvalidHeader {
        /// Description of the header error.
        message: String,
    },

    /// A frequency table whose counts exceed the number of coder states.
    #[error("Invalid {table} frequency table: sum {sum} exceeds {states} states")]
    InvalidFrequencyTable {
        /// Which table (literal, L, M, D).
        table: &'static str,
        /// Sum of the frequencies.
        sum: u32,
        /// Number of states of the table.
        states: u32,
    },

    /// Corrupted data in a compressed stream.
    #[error("Corrupted data at offset {offset}: {message}")]
    CorruptedData {
        /// Byte offset where corruption was detected.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Unexpected end of input.
    #[error("Unexpected end of input: expected {expected} more bytes")]
    UnexpectedEof {
        /// Number of bytes that were expected but not available.
        expected: usize,
    },

    /// Buffer too small for operation.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Number of bytes needed.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },

    /// Match distance pointing before the start of the output.
    #[error("Invalid back-reference distance: {distance} exceeds history size {history_size}")]
    InvalidDistance {
        /// The invalid distance value.
        distance: usize,
        /// Bytes of output available as history.
        history_size: usize,
    },

    /// Codec configuration out of range.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the offending parameter.
        message: String,
    },
}

/// Result type alias for OxiArc operations.
pub type Result<T> = std::result::Result<T, OxiArcError>;

impl OxiArcError {
    /// Create an invalid magic error.
    pub fn invalid_magic(magic: u32, offset: u64) -> Self {
        Self::InvalidMagic { magic, offset }
    }

    /// Create an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Create an invalid frequency table error.
    pub fn invalid_frequency_table(table: &'static str, sum: u32, states: u32) -> Self {
        Self::InvalidFrequencyTable { table, sum, states }
    }

    /// Create a corrupted data error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptedData {
            offset,
            message: message.into(),
        }
    }

    /// Create an unexpected EOF error.
    pub fn unexpected_eof(expected: usize) -> Self {
        Self::UnexpectedEof { expected }
    }

    /// Create a buffer too small error.
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Self::BufferTooSmall { needed, available }
    }

    /// Create an invalid distance error.
    pub fn invalid_distance(distance: usize, history_size: usize) -> Self {
        Self::InvalidDistance {
            distance,
            history_size,
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
