//! Protocol constants for the Drobo management interface.
//!
//! Values mirror the Linux `sg` driver headers and the vendor's
//! management mode page layout.

// ============================================================================
// Device Identification
// ============================================================================

/// Vendor identification strings accepted from INQUIRY (space padded on the wire).
pub const KNOWN_VENDORS: &[&str] = &["Drobo", "TRUSTED"];

/// Standard INQUIRY allocation length.
pub const INQUIRY_LEN: u8 = 36;

// ============================================================================
// SCSI Opcodes
// ============================================================================

/// INQUIRY (6-byte CDB)
pub const OP_INQUIRY: u8 = 0x12;

/// MODE SENSE(10) - subpage reads
pub const OP_MODE_SENSE_10: u8 = 0x5a;

/// MODE SELECT(10) - subpage writes
pub const OP_MODE_SELECT_10: u8 = 0x55;

/// Vendor-specific opcode for unit actions and firmware transfer
pub const OP_VENDOR: u8 = 0xea;

/// MODE SELECT flags: PF | SP
pub const MODE_SELECT_FLAGS: u8 = 0x11;

/// Flags byte carried by vendor commands
pub const VENDOR_FLAGS: u8 = 0x10;

/// Drobo management mode page
pub const MANAGEMENT_PAGE: u8 = 0x3a;

/// Length of every management command block
pub const COMMAND_BLOCK_LEN: usize = 10;

// ============================================================================
// Vendor Actions (service action byte of OP_VENDOR commands)
// ============================================================================

/// Flash the front panel lights (identify)
pub const ACTION_BLINK: u8 = 0x01;

/// Spin down and power off
pub const ACTION_STANDBY: u8 = 0x0d;

/// Append one chunk to the firmware staging area
pub const ACTION_FIRMWARE_WRITE: u8 = 0x80;

// ============================================================================
// Subpage Identifiers
// ============================================================================

pub const SUBPAGE_CONFIG: u8 = 0x01;
pub const SUBPAGE_CAPACITY: u8 = 0x02;
pub const SUBPAGE_SLOT_INFO: u8 = 0x03;
pub const SUBPAGE_FIRMWARE: u8 = 0x04;
pub const SUBPAGE_SETTINGS: u8 = 0x05;
pub const SUBPAGE_PROTOCOL: u8 = 0x06;
pub const SUBPAGE_LUN_INFO: u8 = 0x08;
pub const SUBPAGE_STATUS: u8 = 0x09;
pub const SUBPAGE_OPTIONS: u8 = 0x30;

/// Response header: flags, subpage, big-endian length
pub const SUBPAGE_HEADER_LEN: usize = 4;

// ============================================================================
// SG_IO
// ============================================================================

pub const SG_IO: u32 = 0x2285;
pub const SG_GET_VERSION_NUM: u32 = 0x2282;
pub const SG_DXFER_NONE: i32 = -1;
pub const SG_DXFER_TO_DEV: i32 = -2;
pub const SG_DXFER_FROM_DEV: i32 = -3;
pub const SG_INTERFACE_ID: i32 = b'S' as i32;

pub const SAM_STAT_GOOD: u8 = 0x00;
pub const SAM_STAT_CHECK_CONDITION: u8 = 0x02;

/// Host status reported when the request timer expired
pub const DID_TIME_OUT: u16 = 0x03;

/// Pass-through timeout unless overridden
pub const DEFAULT_TIMEOUT_MS: u32 = 20_000;

/// Sense buffer handed to the driver
pub const SENSE_BUFFER_LEN: usize = 32;

// ============================================================================
// Session
// ============================================================================

/// Transaction ids run 1..=MAX_TRANSACTION and wrap to 1
pub const MAX_TRANSACTION: u8 = 250;

/// Firmware is streamed to the unit in 32 KiB chunks
pub const FIRMWARE_CHUNK_SIZE: usize = 32 * 1024;

// ============================================================================
// Firmware Image
// ============================================================================

pub const FIRMWARE_MAGIC: &[u8; 4] = b"TDIH";

/// Canonical header size, header CRC included
pub const FIRMWARE_HEADER_LEN: usize = 312;

/// Offset of the header CRC, zeroed while the header CRC is computed
pub const FIRMWARE_HEADER_CRC_OFFSET: usize = 308;

pub const FIRMWARE_ABOUT_LEN: usize = 256;
pub const FIRMWARE_TARGET_NAME_LEN: usize = 16;

// ============================================================================
// Diagnostics
// ============================================================================

/// The first byte of a diagnostic dump is the real key XORed with this
pub const DIAGNOSTIC_KEY_MASK: u8 = 0x2d;
