//! Counted list subpages: disk slots and LUNs.
//!
//! Both lists start with a one-byte record count. An empty response is an
//! empty inventory, not an error.

use std::fmt;

use super::{FieldReader, split_response};
use crate::protocol::bitfield::{
    FileSystem, LedStatus, PartitionScheme, led_status, part_format, part_scheme,
};
use crate::protocol::ProtocolError;
use crate::protocol::constants::{SUBPAGE_LUN_INFO, SUBPAGE_SLOT_INFO};

/// One disk bay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub slot_index: u8,
    pub capacity_bytes: u64,
    pub raw_status: u8,
    pub led: LedStatus,
    /// Disk vendor, empty for a vacant bay
    pub make: String,
    pub model: String,
}

impl SlotRecord {
    pub const MAKE_LEN: usize = 16;
    pub const MODEL_LEN: usize = 16;
    pub const RECORD_LEN: usize = 10 + Self::MAKE_LEN + Self::MODEL_LEN;

    pub fn is_empty_bay(&self) -> bool {
        self.raw_status & 0x80 != 0
    }
}

impl fmt::Display for SlotRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot {}: {} bytes, {}",
            self.slot_index, self.capacity_bytes, self.led
        )?;
        if !self.make.is_empty() || !self.model.is_empty() {
            write!(f, " ({} {})", self.make, self.model)?;
        }
        Ok(())
    }
}

/// Request length needed for `slots` bays, count byte included.
pub fn slot_info_len(slots: u8) -> usize {
    1 + slots as usize * SlotRecord::RECORD_LEN
}

pub fn decode_slot_info(raw: &[u8]) -> Result<Vec<SlotRecord>, ProtocolError> {
    let Some((_, payload)) = split_response(SUBPAGE_SLOT_INFO, raw)? else {
        return Ok(Vec::new());
    };
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let count = payload[0] as usize;
    let mut r = FieldReader::new(
        SUBPAGE_SLOT_INFO,
        payload,
        1 + count * SlotRecord::RECORD_LEN,
    )?;
    r.skip(1)?;

    let mut slots = Vec::with_capacity(count);
    for _ in 0..count {
        let capacity_bytes = r.u64()?;
        let raw_status = r.u8()?;
        let slot_index = r.u8()?;
        let make = r.string(SlotRecord::MAKE_LEN)?;
        let model = r.string(SlotRecord::MODEL_LEN)?;
        slots.push(SlotRecord {
            slot_index,
            capacity_bytes,
            raw_status,
            led: led_status(raw_status)?,
            make,
            model,
        });
    }
    Ok(slots)
}

/// One logical unit exported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunRecord {
    pub lun_index: u8,
    pub size_bytes: u64,
    pub used_bytes: u64,
    pub scheme: PartitionScheme,
    pub formats: Vec<FileSystem>,
    /// Host block device for this LUN, filled in by the session
    pub host_path: Option<String>,
}

impl LunRecord {
    pub const RECORD_LEN: usize = 19;
}

pub fn lun_info_len(luns: u8) -> usize {
    1 + luns as usize * LunRecord::RECORD_LEN
}

pub fn decode_luns(raw: &[u8]) -> Result<Vec<LunRecord>, ProtocolError> {
    let Some((_, payload)) = split_response(SUBPAGE_LUN_INFO, raw)? else {
        return Ok(Vec::new());
    };
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let count = payload[0] as usize;
    let mut r = FieldReader::new(SUBPAGE_LUN_INFO, payload, 1 + count * LunRecord::RECORD_LEN)?;
    r.skip(1)?;

    let mut luns = Vec::with_capacity(count);
    for _ in 0..count {
        let lun_index = r.u8()?;
        let size_bytes = r.u64()?;
        let used_bytes = r.u64()?;
        let scheme = part_scheme(r.u8()?)?;
        let formats = part_format(r.u8()?);
        luns.push(LunRecord {
            lun_index,
            size_bytes,
            used_bytes,
            scheme,
            formats,
            host_path: None,
        });
    }
    Ok(luns)
}
