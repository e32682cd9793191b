//! Symbolic decoding of raw status words.
//!
//! Everything here is pure: raw bits in, typed values out.

use std::fmt;
use tracing::warn;

use super::error::ProtocolError;

// ============================================================================
// LED status
// ============================================================================

/// A single bay indicator colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    Black,
    Red,
    Yellow,
    Green,
    /// Empty bay
    Gray,
}

impl LedColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedColor::Black => "black",
            LedColor::Red => "red",
            LedColor::Yellow => "yellow",
            LedColor::Green => "green",
            LedColor::Gray => "gray",
        }
    }
}

impl fmt::Display for LedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bay indicator state: steady, or alternating between two colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedStatus {
    Solid(LedColor),
    Flashing(LedColor, LedColor),
}

impl LedStatus {
    /// Colours in display order.
    pub fn colors(&self) -> Vec<LedColor> {
        match *self {
            LedStatus::Solid(c) => vec![c],
            LedStatus::Flashing(a, b) => vec![a, b],
        }
    }
}

impl fmt::Display for LedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedStatus::Solid(c) => write!(f, "{}", c),
            LedStatus::Flashing(a, b) => write!(f, "[{}, {}]", a, b),
        }
    }
}

/// Decode a slot LED code.
///
/// Bit 7 marks an empty bay regardless of the low bits.
pub fn led_status(code: u8) -> Result<LedStatus, ProtocolError> {
    use LedColor::*;

    if code & 0x80 != 0 {
        return Ok(LedStatus::Solid(Gray));
    }
    let status = match code {
        0 => LedStatus::Solid(Black),
        1 => LedStatus::Solid(Red),
        2 => LedStatus::Solid(Yellow),
        3 => LedStatus::Solid(Green),
        4 => LedStatus::Flashing(Red, Green),
        5 => LedStatus::Flashing(Red, Yellow),
        6 => LedStatus::Flashing(Red, Black),
        other => return Err(ProtocolError::InvalidLedCode(other)),
    };
    Ok(status)
}

// ============================================================================
// Unit status
// ============================================================================

/// Condition reported in the unit status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitCondition {
    RedAlert,
    YellowAlert,
    NoDisks,
    BadDisk,
    TooManyMissingDisks,
    NoRedundancy,
    NoMagicHotspare,
    NoSpaceLeft,
    RelayoutInProgress,
    FormatInProgress,
    MismatchedDisks,
    UnknownVersion,
    NewFirmwareInstalled,
    NewLunAvailableAfterReboot,
    /// Set bits outside the known table (mask of those bits)
    Unknown(u32),
}

const UNIT_STATUS_BITS: &[(u32, UnitCondition)] = &[
    (0x0002, UnitCondition::RedAlert),
    (0x0004, UnitCondition::YellowAlert),
    (0x0008, UnitCondition::NoDisks),
    (0x0010, UnitCondition::BadDisk),
    (0x0020, UnitCondition::TooManyMissingDisks),
    (0x0040, UnitCondition::NoRedundancy),
    (0x0080, UnitCondition::NoMagicHotspare),
    (0x0100, UnitCondition::NoSpaceLeft),
    (0x0200, UnitCondition::RelayoutInProgress),
    (0x0400, UnitCondition::FormatInProgress),
    (0x0800, UnitCondition::MismatchedDisks),
    (0x1000, UnitCondition::UnknownVersion),
    (0x2000, UnitCondition::NewFirmwareInstalled),
    (0x4000, UnitCondition::NewLunAvailableAfterReboot),
];

/// Bit 0 only says "normal"; it never produces an entry.
const UNIT_STATUS_NORMAL: u32 = 0x0001;

impl fmt::Display for UnitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitCondition::RedAlert => "Red alert",
            UnitCondition::YellowAlert => "Yellow alert",
            UnitCondition::NoDisks => "No disks",
            UnitCondition::BadDisk => "Bad disk",
            UnitCondition::TooManyMissingDisks => "Too many missing disks",
            UnitCondition::NoRedundancy => "No redundancy",
            UnitCondition::NoMagicHotspare => "No magic hotspare",
            UnitCondition::NoSpaceLeft => "no space left",
            UnitCondition::RelayoutInProgress => "Relay out in progress",
            UnitCondition::FormatInProgress => "Format in progress",
            UnitCondition::MismatchedDisks => "Mismatched disks",
            UnitCondition::UnknownVersion => "Unknown version",
            UnitCondition::NewFirmwareInstalled => "New firmware installed",
            UnitCondition::NewLunAvailableAfterReboot => "New LUN available after reboot",
            UnitCondition::Unknown(mask) => {
                let bits: Vec<String> = (0..32u32)
                    .filter(|&b| mask & (1u32 << b) != 0)
                    .map(|b| b.to_string())
                    .collect();
                let noun = if bits.len() == 1 { "bit" } else { "bits" };
                return write!(f, "Unknown error ({} {})", noun, bits.join(", "));
            }
        };
        f.write_str(s)
    }
}

/// Decode the unit status word into conditions, in ascending bit order.
pub fn unit_status(mask: u32) -> Vec<UnitCondition> {
    let mut conditions: Vec<UnitCondition> = UNIT_STATUS_BITS
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, cond)| cond.clone())
        .collect();

    let known = UNIT_STATUS_BITS
        .iter()
        .fold(UNIT_STATUS_NORMAL, |acc, (bit, _)| acc | bit);
    let leftover = mask & !known;
    if leftover != 0 {
        conditions.push(UnitCondition::Unknown(leftover));
    }
    conditions
}

// ============================================================================
// Partition format / scheme
// ============================================================================

/// Filesystem reported for a LUN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystem {
    NoFormat,
    Ntfs,
    Hfs,
    Ext3,
    Fat32,
}

impl fmt::Display for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileSystem::NoFormat => "NO FORMAT",
            FileSystem::Ntfs => "NTFS",
            FileSystem::Hfs => "HFS",
            FileSystem::Ext3 => "EXT3",
            FileSystem::Fat32 => "FAT32",
        };
        f.write_str(s)
    }
}

/// Decode LUN format flags. FAT32 is the absence of every known bit.
pub fn part_format(flags: u8) -> Vec<FileSystem> {
    let mut formats = Vec::new();
    if flags & 0x01 != 0 {
        formats.push(FileSystem::NoFormat);
    }
    if flags & 0x02 != 0 {
        formats.push(FileSystem::Ntfs);
    }
    if flags & 0x04 != 0 {
        formats.push(FileSystem::Hfs);
    }
    if flags & 0x88 != 0 {
        formats.push(FileSystem::Ext3);
    }
    if formats.is_empty() {
        formats.push(FileSystem::Fat32);
    }
    if formats.len() > 1 {
        warn!(
            flags = %format!("0x{:02X}", flags),
            formats = ?formats,
            "multiple partition types reported, format is ambiguous"
        );
    }
    formats
}

/// LUN partition table type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionScheme {
    NoPartitions,
    Mbr,
    Apm,
    Gpt,
}

impl fmt::Display for PartitionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PartitionScheme::NoPartitions => "No Partitions",
            PartitionScheme::Mbr => "MBR",
            PartitionScheme::Apm => "APM",
            PartitionScheme::Gpt => "GPT",
        };
        f.write_str(s)
    }
}

pub fn part_scheme(code: u8) -> Result<PartitionScheme, ProtocolError> {
    match code {
        0 => Ok(PartitionScheme::NoPartitions),
        1 => Ok(PartitionScheme::Mbr),
        2 => Ok(PartitionScheme::Apm),
        3 => Ok(PartitionScheme::Gpt),
        other => Err(ProtocolError::InvalidPartitionScheme(other)),
    }
}

// ============================================================================
// Unit features
// ============================================================================

const FEATURE_BITS: &[(u32, &str)] = &[
    (0x0000_0001, "NO_AUTO_REBOOT"),
    (0x0000_0002, "NO_FAT32_FORMAT"),
    (0x0000_0004, "USED_CAPACITY_FROM_HOST"),
    (0x0000_0008, "DISKPACKSTATUS"),
    (0x0000_0010, "ENCRYPT_NOHEADER"),
    (0x0000_0020, "CMD_STATUS_QUERIABLE"),
    (0x0000_0040, "VARIABLE_LUN_SIZE_1_16"),
    (0x0000_0080, "PARTITION_LUN_GPT_MBR"),
    (0x0000_0100, "FAT32_FORMAT_VOLNAME"),
    (0x0000_0200, "SUPPORTS_DROBOSHARE"),
    (0x0000_0400, "SUPPORTS_NEW_LUNINFO2"),
    (0x0000_0800, "LUN_MANAGEMENT"),
    (0x0000_1000, "SUPPORTS_OPTIONS2"),
    (0x0000_2000, "SUPPORTS_VOLUME_RENAME"),
    (0x0000_4000, "SUPPORTS_SINGLE_LUN_FORMAT"),
    (0x0000_8000, "SUPPORTS_SHUTDOWN"),
    (0x0002_0000, "SUPPORTS_ISCSI"),
];

/// Capability advertised in the firmware subpage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feature {
    Named(&'static str),
    /// Every unrecognised bit, aggregated
    Leftover(u32),
}

impl Feature {
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Feature::Named(n) => Some(n),
            Feature::Leftover(_) => None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Named(n) => f.write_str(n),
            Feature::Leftover(mask) => write!(f, "leftover bits: 0x{:08X}", mask),
        }
    }
}

pub fn unit_features(mask: u32) -> Vec<Feature> {
    let mut features = Vec::new();
    let mut leftover = mask;
    for &(bit, name) in FEATURE_BITS {
        if mask & bit != 0 {
            features.push(Feature::Named(name));
            leftover &= !bit;
        }
    }
    if leftover != 0 {
        features.push(Feature::Leftover(leftover));
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_led_table() {
        use LedColor::*;
        assert_eq!(led_status(0).unwrap(), LedStatus::Solid(Black));
        assert_eq!(led_status(1).unwrap(), LedStatus::Solid(Red));
        assert_eq!(led_status(2).unwrap(), LedStatus::Solid(Yellow));
        assert_eq!(led_status(3).unwrap(), LedStatus::Solid(Green));
        assert_eq!(led_status(4).unwrap(), LedStatus::Flashing(Red, Green));
        assert_eq!(led_status(5).unwrap(), LedStatus::Flashing(Red, Yellow));
        assert_eq!(led_status(6).unwrap().colors(), vec![Red, Black]);
        assert_eq!(led_status(3).unwrap().to_string(), "green");
        assert_eq!(led_status(6).unwrap().to_string(), "[red, black]");
    }

    #[test]
    fn test_led_empty_bay_ignores_low_bits() {
        assert_eq!(led_status(0x80).unwrap().to_string(), "gray");
        assert_eq!(led_status(0x83).unwrap(), LedStatus::Solid(LedColor::Gray));
    }

    #[test]
    fn test_led_out_of_domain() {
        assert_eq!(led_status(7), Err(ProtocolError::InvalidLedCode(7)));
        assert!(led_status(0x7f).is_err());
    }

    #[test]
    fn test_unit_status_normal() {
        assert!(unit_status(0).is_empty());
        assert!(unit_status(1).is_empty());
    }

    #[test]
    fn test_unit_status_single_bits() {
        let names: Vec<String> = (1..15)
            .map(|b| unit_status(1 << b)[0].to_string())
            .collect();
        assert_eq!(names[0], "Red alert");
        assert_eq!(names[3], "Bad disk");
        assert_eq!(names[7], "no space left");
        assert_eq!(names[13], "New LUN available after reboot");
    }

    #[test]
    fn test_unit_status_ascending_order() {
        let conds = unit_status(0x0012);
        assert_eq!(conds, vec![UnitCondition::RedAlert, UnitCondition::BadDisk]);
    }

    #[test]
    fn test_unit_status_unknown_aggregated() {
        let conds = unit_status(0x1001_0002);
        assert_eq!(conds.len(), 2);
        assert_eq!(conds[1], UnitCondition::Unknown(0x1001_0000));
        assert_eq!(conds[1].to_string(), "Unknown error (bits 16, 28)");

        let single = unit_status(0x1000_0000);
        assert_eq!(single[0].to_string(), "Unknown error (bit 28)");
    }

    #[test]
    fn test_unit_status_entry_count_matches_known_bits() {
        for mask in [0u32, 0x7fff, 0xffff_ffff, 0x8000, 0x0000_4001, 0xdead_beef] {
            let known = (mask & 0x7ffe).count_ones() as usize;
            let unknown = usize::from(mask & !0x7fff != 0);
            assert_eq!(unit_status(mask).len(), known + unknown, "mask {:#x}", mask);
        }
    }

    #[test]
    fn test_part_format() {
        assert_eq!(part_format(0x00), vec![FileSystem::Fat32]);
        assert_eq!(part_format(0x01), vec![FileSystem::NoFormat]);
        assert_eq!(part_format(0x02), vec![FileSystem::Ntfs]);
        assert_eq!(part_format(0x04), vec![FileSystem::Hfs]);
        assert_eq!(part_format(0x08), vec![FileSystem::Ext3]);
        assert_eq!(part_format(0x80), vec![FileSystem::Ext3]);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a scoped subscriber and return the warnings it logged.
    fn warnings_during(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_part_format_ambiguous() {
        let mut formats = Vec::new();
        let log = warnings_during(|| formats = part_format(0x03));
        assert_eq!(formats, vec![FileSystem::NoFormat, FileSystem::Ntfs]);
        assert!(log.contains("WARN"));
        assert!(log.contains("format is ambiguous"));
        assert!(log.contains("0x03"));
    }

    #[test]
    fn test_part_format_single_type_is_quiet() {
        // both EXT3 bits are one category
        let mut formats = Vec::new();
        let log = warnings_during(|| formats = part_format(0x88));
        assert_eq!(formats, vec![FileSystem::Ext3]);
        assert!(log.is_empty());
        assert!(warnings_during(|| {
            part_format(0x00);
        })
        .is_empty());
    }

    #[test]
    fn test_part_scheme() {
        assert_eq!(part_scheme(0).unwrap().to_string(), "No Partitions");
        assert_eq!(part_scheme(1).unwrap().to_string(), "MBR");
        assert_eq!(part_scheme(2).unwrap().to_string(), "APM");
        assert_eq!(part_scheme(3).unwrap().to_string(), "GPT");
        assert_eq!(part_scheme(4), Err(ProtocolError::InvalidPartitionScheme(4)));
    }

    #[test]
    fn test_unit_features() {
        let f = unit_features(0x0003);
        assert_eq!(
            f,
            vec![Feature::Named("NO_AUTO_REBOOT"), Feature::Named("NO_FAT32_FORMAT")]
        );
        assert_eq!(unit_features(0x8000)[0].name(), Some("SUPPORTS_SHUTDOWN"));
        assert_eq!(unit_features(0x20000)[0].name(), Some("SUPPORTS_ISCSI"));
        assert!(unit_features(0).is_empty());
    }

    #[test]
    fn test_unit_features_leftovers_aggregated() {
        let f = unit_features(0x0030_0001);
        assert_eq!(f.len(), 2);
        assert_eq!(f[1], Feature::Leftover(0x0030_0000));
        assert_eq!(f[1].to_string(), "leftover bits: 0x00300000");
    }
}
