//! Command block layout for management requests.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

use super::constants::*;

/// Transfer direction of a pass-through request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host -> Device (put)
    ToDevice,
    /// Device -> Host (get)
    FromDevice,
}

impl Direction {
    /// Value for the `dxfer_direction` field of the pass-through header.
    pub fn sg_value(self) -> i32 {
        match self {
            Direction::ToDevice => SG_DXFER_TO_DEV,
            Direction::FromDevice => SG_DXFER_FROM_DEV,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToDevice => write!(f, "TX"),
            Direction::FromDevice => write!(f, "RX"),
        }
    }
}

/// Management command block (10 bytes / 0x0A).
///
/// Wire layout:
/// `[opcode][flags][service_action][subpage][0][0][transaction_id][length:BE16][control]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBlock {
    pub opcode: u8,
    pub flags: u8,
    pub service_action: u8,
    pub subpage: u8,
    pub transaction_id: u8,
    pub length: u16,
    pub control: u8,
}

impl CommandBlock {
    pub const SIZE: usize = COMMAND_BLOCK_LEN;

    /// MODE SENSE(10) on the management page.
    pub fn subpage_read(subpage: u8, transaction_id: u8, length: u16) -> Self {
        Self {
            opcode: OP_MODE_SENSE_10,
            flags: 0,
            service_action: MANAGEMENT_PAGE,
            subpage,
            transaction_id,
            length,
            control: 0,
        }
    }

    /// MODE SELECT(10) on the management page.
    pub fn subpage_write(subpage: u8, transaction_id: u8, length: u16) -> Self {
        Self {
            opcode: OP_MODE_SELECT_10,
            flags: MODE_SELECT_FLAGS,
            service_action: MANAGEMENT_PAGE,
            subpage,
            transaction_id,
            length,
            control: 0,
        }
    }

    /// Vendor action (blink, standby, firmware chunk).
    pub fn vendor_action(action: u8, transaction_id: u8, length: u16) -> Self {
        Self {
            opcode: OP_VENDOR,
            flags: VENDOR_FLAGS,
            service_action: action,
            subpage: 0,
            transaction_id,
            length,
            control: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; COMMAND_BLOCK_LEN] {
        let mut buf = [0u8; COMMAND_BLOCK_LEN];
        buf[0] = self.opcode;
        buf[1] = self.flags;
        buf[2] = self.service_action;
        buf[3] = self.subpage;
        // bytes 4..6 reserved
        buf[6] = self.transaction_id;
        BigEndian::write_u16(&mut buf[7..9], self.length);
        buf[9] = self.control;
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < COMMAND_BLOCK_LEN {
            return None;
        }
        Some(Self {
            opcode: data[0],
            flags: data[1],
            service_action: data[2],
            subpage: data[3],
            transaction_id: data[6],
            length: BigEndian::read_u16(&data[7..9]),
            control: data[9],
        })
    }

    /// Direction implied by the opcode.
    /// Vendor actions are writes even when they carry no data.
    pub fn direction(&self) -> Direction {
        match self.opcode {
            OP_MODE_SELECT_10 | OP_VENDOR => Direction::ToDevice,
            _ => Direction::FromDevice,
        }
    }
}

impl fmt::Display for CommandBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Build the command block for a subpage exchange.
pub fn encode_request(
    subpage: u8,
    transaction_id: u8,
    length: u16,
    direction: Direction,
) -> [u8; COMMAND_BLOCK_LEN] {
    match direction {
        Direction::FromDevice => CommandBlock::subpage_read(subpage, transaction_id, length),
        Direction::ToDevice => CommandBlock::subpage_write(subpage, transaction_id, length),
    }
    .to_bytes()
}

/// Standard 6-byte INQUIRY CDB.
pub fn inquiry_cdb(allocation_len: u8) -> [u8; 6] {
    [OP_INQUIRY, 0, 0, 0, allocation_len, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_block_layout() {
        let cdb = encode_request(SUBPAGE_CONFIG, 0, 20, Direction::FromDevice);
        assert_eq!(cdb, [0x5a, 0x00, 0x3a, 0x01, 0x00, 0x00, 0x00, 0x00, 0x14, 0x00]);
    }

    #[test]
    fn test_write_block_layout() {
        let cdb = encode_request(SUBPAGE_SETTINGS, 7, 0x0128, Direction::ToDevice);
        assert_eq!(cdb, [0x55, 0x11, 0x3a, 0x05, 0x00, 0x00, 0x07, 0x01, 0x28, 0x00]);
    }

    #[test]
    fn test_vendor_action_layout() {
        let cmd = CommandBlock::vendor_action(ACTION_BLINK, 42, 0);
        assert_eq!(cmd.to_bytes(), [0xea, 0x10, 0x01, 0x00, 0x00, 0x00, 42, 0x00, 0x00, 0x00]);
        assert_eq!(cmd.direction(), Direction::ToDevice);
        assert_eq!(
            CommandBlock::vendor_action(ACTION_STANDBY, 1, 0).direction(),
            Direction::ToDevice
        );
        assert_eq!(
            CommandBlock::vendor_action(ACTION_FIRMWARE_WRITE, 1, 512).direction(),
            Direction::ToDevice
        );
    }

    #[test]
    fn test_parse_back() {
        let cmd = CommandBlock::subpage_read(SUBPAGE_STATUS, 250, 12);
        let parsed = CommandBlock::from_bytes(&cmd.to_bytes()).unwrap();
        assert_eq!(parsed, cmd);
        assert!(CommandBlock::from_bytes(&[0x5a, 0x00]).is_none());
    }

    #[test]
    fn test_display_hex() {
        let cmd = CommandBlock::subpage_read(SUBPAGE_STATUS, 3, 12);
        assert_eq!(cmd.to_string(), "5a 00 3a 09 00 00 03 00 0c 00");
    }

    #[test]
    fn test_inquiry_cdb() {
        assert_eq!(inquiry_cdb(INQUIRY_LEN), [0x12, 0, 0, 0, 36, 0]);
    }
}
