//! Subpage codec: response framing and per-subpage payload decoding.
//!
//! Every response starts with `[flags][subpage][length:BE16]`. Payload
//! decoders take the bytes after that header and never read past them.

pub mod inventory;
pub mod unit;

pub use inventory::{
    LunRecord, SlotRecord, decode_luns, decode_slot_info, lun_info_len, slot_info_len,
};
pub use unit::{
    Capacity, DeviceConfig, FirmwareInfo, Inquiry, Options, ProtocolVersion, Settings,
    UnitStatus, decode_capacity, decode_config, decode_firmware, decode_inquiry, decode_options,
    decode_protocol, decode_settings, decode_status, encode_settings,
};

use byteorder::{BigEndian, ByteOrder};

use crate::protocol::{ProtocolError, SUBPAGE_HEADER_LEN};

/// Parsed response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpageHeader {
    pub flags: u8,
    pub subpage: u8,
    pub length: u16,
}

impl SubpageHeader {
    pub const SIZE: usize = SUBPAGE_HEADER_LEN;

    pub fn new(subpage: u8, length: u16) -> Self {
        Self {
            flags: 0,
            subpage,
            length,
        }
    }

    pub fn to_bytes(&self) -> [u8; SUBPAGE_HEADER_LEN] {
        let mut buf = [0u8; SUBPAGE_HEADER_LEN];
        buf[0] = self.flags;
        buf[1] = self.subpage;
        BigEndian::write_u16(&mut buf[2..4], self.length);
        buf
    }
}

/// Split a raw response into header and payload, checking it answers `expected`.
///
/// Returns `Ok(None)` for an empty response.
pub fn split_response(
    expected: u8,
    raw: &[u8],
) -> Result<Option<(SubpageHeader, &[u8])>, ProtocolError> {
    if raw.is_empty() {
        return Ok(None);
    }
    if raw.len() < SUBPAGE_HEADER_LEN {
        return Err(ProtocolError::TooShort {
            subpage: expected,
            expected: SUBPAGE_HEADER_LEN,
            actual: raw.len(),
        });
    }
    let header = SubpageHeader {
        flags: raw[0],
        subpage: raw[1],
        length: BigEndian::read_u16(&raw[2..4]),
    };
    if header.subpage != expected {
        return Err(ProtocolError::SubpageMismatch {
            expected,
            actual: header.subpage,
        });
    }
    let available = raw.len() - SUBPAGE_HEADER_LEN;
    let declared = header.length as usize;
    if declared > available {
        return Err(ProtocolError::Truncated {
            subpage: expected,
            declared,
            available,
        });
    }
    Ok(Some((
        header,
        &raw[SUBPAGE_HEADER_LEN..SUBPAGE_HEADER_LEN + declared],
    )))
}

/// Frame a payload with its response header. Used by fixtures and tests.
pub fn frame_response(subpage: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SUBPAGE_HEADER_LEN + payload.len());
    out.extend_from_slice(&SubpageHeader::new(subpage, payload.len() as u16).to_bytes());
    out.extend_from_slice(payload);
    out
}

/// Bounds-checked big-endian reader over a payload.
pub(crate) struct FieldReader<'a> {
    subpage: u8,
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    /// Fails unless at least `minimum` bytes are present.
    pub fn new(subpage: u8, data: &'a [u8], minimum: usize) -> Result<Self, ProtocolError> {
        if data.len() < minimum {
            return Err(ProtocolError::TooShort {
                subpage,
                expected: minimum,
                actual: data.len(),
            });
        }
        Ok(Self {
            subpage,
            data,
            pos: 0,
        })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(ProtocolError::TooShort {
                subpage: self.subpage,
                expected: end,
                actual: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    /// Fixed-width string field.
    pub fn string(&mut self, width: usize) -> Result<String, ProtocolError> {
        Ok(fixed_str(self.take(width)?))
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.take(n).map(|_| ())
    }
}

/// Decode a NUL-padded fixed-width field.
pub fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

/// Encode a string into a NUL-padded fixed-width field.
pub fn put_fixed_str(
    field: &'static str,
    value: &str,
    width: usize,
    out: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(ProtocolError::FieldTooLong {
            field,
            limit: width,
            actual: bytes.len(),
        });
    }
    out.extend_from_slice(bytes);
    out.resize(out.len() + (width - bytes.len()), 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_response() {
        let raw = frame_response(0x09, &[1, 2, 3, 4]);
        let (header, payload) = split_response(0x09, &raw).unwrap().unwrap();
        assert_eq!(header.subpage, 0x09);
        assert_eq!(header.length, 4);
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_split_ignores_padding_past_declared_length() {
        let mut raw = frame_response(0x02, &[9, 9]);
        raw.extend_from_slice(&[0xff; 6]);
        let (_, payload) = split_response(0x02, &raw).unwrap().unwrap();
        assert_eq!(payload, &[9, 9]);
    }

    #[test]
    fn test_split_empty_is_none() {
        assert!(split_response(0x01, &[]).unwrap().is_none());
    }

    #[test]
    fn test_split_rejects_wrong_subpage() {
        let raw = frame_response(0x05, &[0; 4]);
        assert_eq!(
            split_response(0x04, &raw),
            Err(ProtocolError::SubpageMismatch {
                expected: 0x04,
                actual: 0x05
            })
        );
    }

    #[test]
    fn test_split_rejects_short_header_and_truncation() {
        assert!(matches!(
            split_response(0x01, &[0, 1]),
            Err(ProtocolError::TooShort { .. })
        ));
        // header claims 16 payload bytes, 4 arrived
        let raw = [0u8, 0x01, 0x00, 0x10, 1, 2, 3, 4];
        assert!(matches!(
            split_response(0x01, &raw),
            Err(ProtocolError::Truncated {
                declared: 16,
                available: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_fixed_str() {
        assert_eq!(fixed_str(b"Drobo01\0\0\0"), "Drobo01");
        assert_eq!(fixed_str(b"Drobo   "), "Drobo");
        assert_eq!(fixed_str(b""), "");
    }

    #[test]
    fn test_put_fixed_str() {
        let mut out = Vec::new();
        put_fixed_str("name", "abc", 8, &mut out).unwrap();
        assert_eq!(out, b"abc\0\0\0\0\0");
        assert!(put_fixed_str("name", "toolong", 4, &mut out).is_err());
    }

    #[test]
    fn test_reader_bounds() {
        let data = [0u8, 0, 0, 1, 0xff];
        let mut r = FieldReader::new(0x09, &data, 4).unwrap();
        assert_eq!(r.u32().unwrap(), 1);
        assert_eq!(r.u8().unwrap(), 0xff);
        assert!(r.u8().is_err());
        assert!(FieldReader::new(0x09, &data, 8).is_err());
    }
}
