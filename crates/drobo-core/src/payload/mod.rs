//! Payload handling module.
//!
//! Provides validation and chunking for firmware images.

pub mod firmware;

pub use firmware::{
    ChunkIterator, FirmwareError, FirmwareHeader, FirmwareImage, crc32, validate,
};
