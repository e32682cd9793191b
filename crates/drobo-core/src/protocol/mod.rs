//! Protocol module - management page definitions.

pub mod bitfield;
pub mod command;
pub mod constants;
pub mod error;

pub use bitfield::{
    Feature, FileSystem, LedColor, LedStatus, PartitionScheme, UnitCondition, led_status,
    part_format, part_scheme, unit_features, unit_status,
};
pub use command::{CommandBlock, Direction, encode_request, inquiry_cdb};
pub use constants::*;
pub use error::ProtocolError;
