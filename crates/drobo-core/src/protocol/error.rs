//! Errors raised while decoding management responses.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Subpage 0x{subpage:02X} too short: expected {expected} bytes, got {actual}")]
    TooShort {
        subpage: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Subpage 0x{subpage:02X} declares {declared} payload bytes, only {available} received")]
    Truncated {
        subpage: u8,
        declared: usize,
        available: usize,
    },

    #[error("Subpage mismatch: requested 0x{expected:02X}, device answered 0x{actual:02X}")]
    SubpageMismatch { expected: u8, actual: u8 },

    #[error("Subpage 0x{subpage:02X} returned no data")]
    Empty { subpage: u8 },

    #[error("LED status code 0x{0:02X} out of range")]
    InvalidLedCode(u8),

    #[error("Partition scheme {0} out of range")]
    InvalidPartitionScheme(u8),

    #[error("Field '{field}' is {actual} bytes, limit is {limit}")]
    FieldTooLong {
        field: &'static str,
        limit: usize,
        actual: usize,
    },
}
