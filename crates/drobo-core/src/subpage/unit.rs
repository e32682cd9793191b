//! Fixed-layout subpages describing the unit as a whole.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use super::{FieldReader, fixed_str, put_fixed_str, split_response};
use crate::protocol::bitfield::{Feature, UnitCondition, unit_features, unit_status};
use crate::protocol::ProtocolError;
use crate::protocol::constants::*;

/// Payload of a fixed-layout subpage, or `Empty` if the device sent nothing.
fn payload(subpage: u8, raw: &[u8]) -> Result<&[u8], ProtocolError> {
    split_response(subpage, raw)?
        .map(|(_, p)| p)
        .ok_or(ProtocolError::Empty { subpage })
}

// ============================================================================
// Status (0x09)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub raw: u32,
    pub conditions: Vec<UnitCondition>,
    pub relayout_count: u32,
}

impl UnitStatus {
    pub const PAYLOAD_LEN: usize = 8;

    pub fn is_healthy(&self) -> bool {
        self.conditions.is_empty()
    }
}

pub fn decode_status(raw: &[u8]) -> Result<UnitStatus, ProtocolError> {
    let mut r = FieldReader::new(
        SUBPAGE_STATUS,
        payload(SUBPAGE_STATUS, raw)?,
        UnitStatus::PAYLOAD_LEN,
    )?;
    let mask = r.u32()?;
    Ok(UnitStatus {
        raw: mask,
        conditions: unit_status(mask),
        relayout_count: r.u32()?,
    })
}

// ============================================================================
// Capacity (0x02)
// ============================================================================

/// Capacity counters in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub free: u64,
    pub used: u64,
    pub total: u64,
    /// Raw space not yet protected by redundancy
    pub unprotected: u64,
}

impl Capacity {
    pub const PAYLOAD_LEN: usize = 32;
}

pub fn decode_capacity(raw: &[u8]) -> Result<Capacity, ProtocolError> {
    let mut r = FieldReader::new(
        SUBPAGE_CAPACITY,
        payload(SUBPAGE_CAPACITY, raw)?,
        Capacity::PAYLOAD_LEN,
    )?;
    Ok(Capacity {
        free: r.u64()?,
        used: r.u64()?,
        total: r.u64()?,
        unprotected: r.u64()?,
    })
}

// ============================================================================
// Config (0x01)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub slot_count: u8,
    pub max_lun_count: u8,
    pub max_lun_size: u64,
}

impl DeviceConfig {
    pub const PAYLOAD_LEN: usize = 10;
}

pub fn decode_config(raw: &[u8]) -> Result<DeviceConfig, ProtocolError> {
    let mut r = FieldReader::new(
        SUBPAGE_CONFIG,
        payload(SUBPAGE_CONFIG, raw)?,
        DeviceConfig::PAYLOAD_LEN,
    )?;
    Ok(DeviceConfig {
        slot_count: r.u8()?,
        max_lun_count: r.u8()?,
        max_lun_size: r.u64()?,
    })
}

// ============================================================================
// Firmware (0x04)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub version: String,
    pub revision: String,
    pub architecture: String,
    pub cpu_vendor: String,
    pub build_target: String,
    pub vendor: String,
    pub model: String,
    pub raw_features: u32,
    pub features: Vec<Feature>,
}

impl FirmwareInfo {
    pub const PAYLOAD_LEN: usize = 8 + 8 + 16 + 16 + 16 + 16 + 32 + 4;

    pub fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f.name() == Some(name))
    }
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} firmware {} ({}) on {}/{}",
            self.vendor, self.model, self.version, self.revision, self.cpu_vendor, self.architecture
        )
    }
}

pub fn decode_firmware(raw: &[u8]) -> Result<FirmwareInfo, ProtocolError> {
    let mut r = FieldReader::new(
        SUBPAGE_FIRMWARE,
        payload(SUBPAGE_FIRMWARE, raw)?,
        FirmwareInfo::PAYLOAD_LEN,
    )?;
    let version = r.string(8)?;
    let revision = r.string(8)?;
    let architecture = r.string(16)?;
    let cpu_vendor = r.string(16)?;
    let build_target = r.string(16)?;
    let vendor = r.string(16)?;
    let model = r.string(32)?;
    let raw_features = r.u32()?;
    Ok(FirmwareInfo {
        version,
        revision,
        architecture,
        cpu_vendor,
        build_target,
        vendor,
        model,
        raw_features,
        features: unit_features(raw_features),
    })
}

// ============================================================================
// Settings (0x05)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Seconds since the epoch, as last synced from a host
    pub utc_time: u32,
    pub name: String,
}

impl Settings {
    pub const NAME_LEN: usize = 32;
    pub const PAYLOAD_LEN: usize = 4 + Self::NAME_LEN;
}

pub fn decode_settings(raw: &[u8]) -> Result<Settings, ProtocolError> {
    let mut r = FieldReader::new(
        SUBPAGE_SETTINGS,
        payload(SUBPAGE_SETTINGS, raw)?,
        Settings::PAYLOAD_LEN,
    )?;
    Ok(Settings {
        utc_time: r.u32()?,
        name: r.string(Settings::NAME_LEN)?,
    })
}

/// Build the full MODE SELECT buffer (header included) for a settings write.
pub fn encode_settings(settings: &Settings) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = Vec::with_capacity(Settings::PAYLOAD_LEN);
    let mut time = [0u8; 4];
    BigEndian::write_u32(&mut time, settings.utc_time);
    payload.extend_from_slice(&time);
    put_fixed_str("name", &settings.name, Settings::NAME_LEN, &mut payload)?;
    Ok(super::frame_response(SUBPAGE_SETTINGS, &payload))
}

// ============================================================================
// Protocol (0x06)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const PAYLOAD_LEN: usize = 2;
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub fn decode_protocol(raw: &[u8]) -> Result<ProtocolVersion, ProtocolError> {
    let mut r = FieldReader::new(
        SUBPAGE_PROTOCOL,
        payload(SUBPAGE_PROTOCOL, raw)?,
        ProtocolVersion::PAYLOAD_LEN,
    )?;
    Ok(ProtocolVersion {
        major: r.u8()?,
        minor: r.u8()?,
    })
}

// ============================================================================
// Options (0x30)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub dual_disk_redundancy: bool,
    pub spin_down: bool,
    /// Percent used at which the unit turns yellow
    pub yellow_threshold: u8,
    /// Percent used at which the unit turns red
    pub red_threshold: u8,
}

impl Options {
    pub const PAYLOAD_LEN: usize = 4;
}

pub fn decode_options(raw: &[u8]) -> Result<Options, ProtocolError> {
    let mut r = FieldReader::new(
        SUBPAGE_OPTIONS,
        payload(SUBPAGE_OPTIONS, raw)?,
        Options::PAYLOAD_LEN,
    )?;
    let flags = r.u8()?;
    let yellow_threshold = r.u8()?;
    let red_threshold = r.u8()?;
    r.skip(1)?;
    Ok(Options {
        dual_disk_redundancy: flags & 0x01 != 0,
        spin_down: flags & 0x02 != 0,
        yellow_threshold,
        red_threshold,
    })
}

// ============================================================================
// INQUIRY
// ============================================================================

/// Standard INQUIRY identity strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inquiry {
    pub vendor: String,
    pub product: String,
    pub revision: String,
}

impl Inquiry {
    pub const MIN_LEN: usize = 36;
}

pub fn decode_inquiry(raw: &[u8]) -> Result<Inquiry, ProtocolError> {
    if raw.len() < Inquiry::MIN_LEN {
        return Err(ProtocolError::TooShort {
            subpage: OP_INQUIRY,
            expected: Inquiry::MIN_LEN,
            actual: raw.len(),
        });
    }
    Ok(Inquiry {
        vendor: fixed_str(&raw[8..16]),
        product: fixed_str(&raw[16..32]),
        revision: fixed_str(&raw[32..36]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subpage::frame_response;

    fn padded(s: &str, width: usize) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.resize(width, 0);
        v
    }

    #[test]
    fn test_decode_status() {
        let mut p = Vec::new();
        p.extend_from_slice(&0x0000_0012u32.to_be_bytes());
        p.extend_from_slice(&3u32.to_be_bytes());
        let status = decode_status(&frame_response(SUBPAGE_STATUS, &p)).unwrap();
        assert_eq!(status.raw, 0x12);
        assert_eq!(status.relayout_count, 3);
        assert_eq!(
            status.conditions,
            vec![UnitCondition::RedAlert, UnitCondition::BadDisk]
        );
        assert!(!status.is_healthy());
    }

    #[test]
    fn test_decode_status_short() {
        let raw = frame_response(SUBPAGE_STATUS, &[0, 0, 0, 0]);
        assert_eq!(
            decode_status(&raw),
            Err(ProtocolError::TooShort {
                subpage: SUBPAGE_STATUS,
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn test_decode_status_empty() {
        assert_eq!(
            decode_status(&[]),
            Err(ProtocolError::Empty {
                subpage: SUBPAGE_STATUS
            })
        );
    }

    #[test]
    fn test_decode_capacity() {
        let mut p = Vec::new();
        for v in [3000u64, 1000, 4000, 1000] {
            p.extend_from_slice(&v.to_be_bytes());
        }
        let cap = decode_capacity(&frame_response(SUBPAGE_CAPACITY, &p)).unwrap();
        assert_eq!(cap.free, 3000);
        assert_eq!(cap.used, 1000);
        assert_eq!(cap.total, 4000);
        assert_eq!(cap.unprotected, 1000);
    }

    #[test]
    fn test_decode_config() {
        let mut p = vec![4u8, 1];
        p.extend_from_slice(&(2u64 * 1024u64.pow(4)).to_be_bytes());
        let cfg = decode_config(&frame_response(SUBPAGE_CONFIG, &p)).unwrap();
        assert_eq!(cfg.slot_count, 4);
        assert_eq!(cfg.max_lun_count, 1);
        assert_eq!(cfg.max_lun_size, 2 * 1024u64.pow(4));
    }

    #[test]
    fn test_decode_config_rejects_other_subpage() {
        let raw = frame_response(SUBPAGE_CAPACITY, &[0; 32]);
        assert!(matches!(
            decode_config(&raw),
            Err(ProtocolError::SubpageMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_firmware() {
        let mut p = Vec::new();
        p.extend(padded("1.3.5", 8));
        p.extend(padded("12345", 8));
        p.extend(padded("ARM", 16));
        p.extend(padded("Marvell", 16));
        p.extend(padded("ARMMARVELL", 16));
        p.extend(padded("Drobo", 16));
        p.extend(padded("DroboS", 32));
        p.extend_from_slice(&0x0000_8001u32.to_be_bytes());
        assert_eq!(p.len(), FirmwareInfo::PAYLOAD_LEN);

        let fw = decode_firmware(&frame_response(SUBPAGE_FIRMWARE, &p)).unwrap();
        assert_eq!(fw.version, "1.3.5");
        assert_eq!(fw.revision, "12345");
        assert_eq!(fw.architecture, "ARM");
        assert_eq!(fw.model, "DroboS");
        assert!(fw.has_feature("SUPPORTS_SHUTDOWN"));
        assert!(fw.has_feature("NO_AUTO_REBOOT"));
        assert!(!fw.has_feature("SUPPORTS_ISCSI"));
    }

    #[test]
    fn test_settings_write_then_read() {
        let settings = Settings {
            utc_time: 1_700_000_000,
            name: "Drobo01".to_string(),
        };
        let raw = encode_settings(&settings).unwrap();
        assert_eq!(raw.len(), 4 + Settings::PAYLOAD_LEN);
        assert_eq!(&raw[..4], &[0, SUBPAGE_SETTINGS, 0, 36]);
        assert_eq!(decode_settings(&raw).unwrap(), settings);
    }

    #[test]
    fn test_settings_name_too_long() {
        let settings = Settings {
            utc_time: 0,
            name: "x".repeat(33),
        };
        assert!(matches!(
            encode_settings(&settings),
            Err(ProtocolError::FieldTooLong { limit: 32, .. })
        ));
    }

    #[test]
    fn test_decode_protocol_and_options() {
        let proto = decode_protocol(&frame_response(SUBPAGE_PROTOCOL, &[2, 7])).unwrap();
        assert_eq!(proto.to_string(), "2.7");

        let opts = decode_options(&frame_response(SUBPAGE_OPTIONS, &[0x02, 85, 95, 0])).unwrap();
        assert!(!opts.dual_disk_redundancy);
        assert!(opts.spin_down);
        assert_eq!(opts.yellow_threshold, 85);
        assert_eq!(opts.red_threshold, 95);
    }

    #[test]
    fn test_decode_inquiry() {
        let mut raw = vec![0u8; 8];
        raw.extend_from_slice(b"Drobo   ");
        raw.extend_from_slice(b"DroboS          ");
        raw.extend_from_slice(b"1.01");
        let inq = decode_inquiry(&raw).unwrap();
        assert_eq!(inq.vendor, "Drobo");
        assert_eq!(inq.product, "DroboS");
        assert_eq!(inq.revision, "1.01");
        assert!(decode_inquiry(&raw[..20]).is_err());
    }
}
