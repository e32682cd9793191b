//! Firmware image parsing, validation and chunking.
//!
//! A `.tdz` image is a big-endian `TDIH` header followed by the body that
//! is streamed to the unit. Both halves carry a CRC32 (zlib polynomial).
//! The header CRC is computed with its own 4-byte slot zeroed.

use std::fmt;
use std::io::{self, Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use crc::{CRC_32_ISO_HDLC, Crc};
use thiserror::Error;

use crate::protocol::constants::{
    FIRMWARE_ABOUT_LEN, FIRMWARE_HEADER_CRC_OFFSET, FIRMWARE_HEADER_LEN, FIRMWARE_MAGIC,
    FIRMWARE_TARGET_NAME_LEN,
};
use crate::subpage::fixed_str;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("Image too small: {actual} bytes, header needs {minimum}")]
    HeaderTooShort { actual: usize, minimum: usize },
    #[error("Unsupported header length {0}")]
    UnsupportedHeader(i32),
    #[error(
        "Length mismatch: header {header_length} + body {body_length} != image {actual} bytes"
    )]
    LengthMismatch {
        header_length: i32,
        body_length: i32,
        actual: usize,
    },
    #[error("Invalid magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("Header CRC mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    HeaderCrcMismatch { expected: u32, actual: u32 },
    #[error("Body CRC mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    BodyCrcMismatch { expected: u32, actual: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `TDIH` image header (312 bytes, big-endian)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareHeader {
    pub header_length: i32,
    pub header_version: i32,
    pub magic: [u8; 4],
    pub image_version: i32,
    /// Platform the image is built for
    pub target_name: String,
    pub sequence_number: i32,
    pub build_number: i32,
    pub image_flags: i32,
    pub body_length: i32,
    pub body_crc: u32,
    /// Free-form release description
    pub about: String,
    pub header_crc: u32,
}

impl FirmwareHeader {
    pub const SIZE: usize = FIRMWARE_HEADER_LEN;

    /// Header for `target_name` with every length and CRC left at zero.
    pub fn new(target_name: &str, image_version: i32, build_number: i32) -> Self {
        Self {
            header_length: Self::SIZE as i32,
            header_version: 1,
            magic: *FIRMWARE_MAGIC,
            image_version,
            target_name: target_name.to_string(),
            sequence_number: 0,
            build_number,
            image_flags: 0,
            body_length: 0,
            body_crc: 0,
            about: String::new(),
            header_crc: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FirmwareError> {
        if data.len() < Self::SIZE {
            return Err(FirmwareError::HeaderTooShort {
                actual: data.len(),
                minimum: Self::SIZE,
            });
        }
        let header = Self::read(&mut Cursor::new(data))?;
        if header.header_length < Self::SIZE as i32 {
            return Err(FirmwareError::UnsupportedHeader(header.header_length));
        }
        Ok(header)
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let header_length = cursor.read_i32::<BigEndian>()?;
        let header_version = cursor.read_i32::<BigEndian>()?;
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        let image_version = cursor.read_i32::<BigEndian>()?;
        let mut target = [0u8; FIRMWARE_TARGET_NAME_LEN];
        cursor.read_exact(&mut target)?;
        let sequence_number = cursor.read_i32::<BigEndian>()?;
        let build_number = cursor.read_i32::<BigEndian>()?;
        let image_flags = cursor.read_i32::<BigEndian>()?;
        let body_length = cursor.read_i32::<BigEndian>()?;
        let body_crc = cursor.read_u32::<BigEndian>()?;
        let mut about = vec![0u8; FIRMWARE_ABOUT_LEN];
        cursor.read_exact(&mut about)?;
        let header_crc = cursor.read_u32::<BigEndian>()?;
        Ok(Self {
            header_length,
            header_version,
            magic,
            image_version,
            target_name: fixed_str(&target),
            sequence_number,
            build_number,
            image_flags,
            body_length,
            body_crc,
            about: fixed_str(&about),
            header_crc,
        })
    }

    /// Serialize the canonical 312 bytes. Strings longer than their field
    /// are cut at the field width.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        let put_str = |buf: &mut Vec<u8>, s: &str, width: usize| {
            let bytes = s.as_bytes();
            let n = bytes.len().min(width);
            buf.extend_from_slice(&bytes[..n]);
            buf.resize(buf.len() + (width - n), 0);
        };
        buf.extend_from_slice(&self.header_length.to_be_bytes());
        buf.extend_from_slice(&self.header_version.to_be_bytes());
        buf.extend_from_slice(&self.magic);
        buf.extend_from_slice(&self.image_version.to_be_bytes());
        put_str(&mut buf, &self.target_name, FIRMWARE_TARGET_NAME_LEN);
        buf.extend_from_slice(&self.sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.build_number.to_be_bytes());
        buf.extend_from_slice(&self.image_flags.to_be_bytes());
        buf.extend_from_slice(&self.body_length.to_be_bytes());
        buf.extend_from_slice(&self.body_crc.to_be_bytes());
        put_str(&mut buf, &self.about, FIRMWARE_ABOUT_LEN);
        buf.extend_from_slice(&self.header_crc.to_be_bytes());
        buf
    }

    /// Build a complete image around `body`, filling in both lengths and
    /// both CRCs.
    pub fn assemble(&self, body: &[u8]) -> Vec<u8> {
        let mut header = self.clone();
        header.header_length = Self::SIZE as i32;
        header.body_length = body.len() as i32;
        header.body_crc = crc32(body);
        header.header_crc = 0;

        let mut image = header.to_bytes();
        let crc = header_crc(&image, Self::SIZE);
        image[FIRMWARE_HEADER_CRC_OFFSET..FIRMWARE_HEADER_CRC_OFFSET + 4]
            .copy_from_slice(&crc.to_be_bytes());
        image.extend_from_slice(body);
        image
    }
}

impl fmt::Display for FirmwareHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v0x{:08X} build {} seq {} ({} byte body)",
            self.target_name,
            self.image_version,
            self.build_number,
            self.sequence_number,
            self.body_length
        )
    }
}

/// CRC over `image[..header_length]` with the header CRC slot read as zero.
fn header_crc(image: &[u8], header_length: usize) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&image[..FIRMWARE_HEADER_CRC_OFFSET]);
    digest.update(&[0u8; 4]);
    digest.update(&image[FIRMWARE_HEADER_CRC_OFFSET + 4..header_length]);
    digest.finalize()
}

/// Check an image end to end, returning its header.
///
/// Checks run in a fixed order and the first failure wins: header size,
/// total length, magic, header CRC, body CRC.
pub fn validate(image: &[u8]) -> Result<FirmwareHeader, FirmwareError> {
    let header = FirmwareHeader::from_bytes(image)?;

    let declared = header.header_length as i64 + header.body_length as i64;
    if header.body_length < 0 || declared != image.len() as i64 {
        return Err(FirmwareError::LengthMismatch {
            header_length: header.header_length,
            body_length: header.body_length,
            actual: image.len(),
        });
    }

    if &header.magic != FIRMWARE_MAGIC {
        return Err(FirmwareError::BadMagic(header.magic));
    }

    let header_length = header.header_length as usize;
    let actual = header_crc(image, header_length);
    if actual != header.header_crc {
        return Err(FirmwareError::HeaderCrcMismatch {
            expected: header.header_crc,
            actual,
        });
    }

    let actual = crc32(&image[header_length..]);
    if actual != header.body_crc {
        return Err(FirmwareError::BodyCrcMismatch {
            expected: header.body_crc,
            actual,
        });
    }

    Ok(header)
}

/// A validated firmware image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    header: FirmwareHeader,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Validate and wrap raw image bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FirmwareError> {
        let header = validate(&data)?;
        Ok(Self { header, data })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FirmwareError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn header(&self) -> &FirmwareHeader {
        &self.header
    }

    /// Everything after the header; this is what gets flashed.
    pub fn body(&self) -> &[u8] {
        &self.data[self.header.header_length as usize..]
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate the body in `chunk_size` pieces.
    pub fn chunks(&self, chunk_size: usize) -> ChunkIterator<'_> {
        ChunkIterator::new(self.body(), chunk_size)
    }
}

/// Iterator over fixed-size chunks; the last one may be short.
#[derive(Debug)]
pub struct ChunkIterator<'a> {
    data: &'a [u8],
    chunk_size: usize,
    offset: usize,
    current_chunk: usize,
}

impl<'a> ChunkIterator<'a> {
    pub fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            data,
            chunk_size: chunk_size.max(1),
            offset: 0,
            current_chunk: 0,
        }
    }

    /// Total number of chunks, partial one included.
    pub fn total(&self) -> usize {
        self.data.len().div_ceil(self.chunk_size)
    }

    /// Chunks yielded so far.
    pub fn current(&self) -> usize {
        self.current_chunk
    }

    /// Byte offset of the next chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_last(&self) -> bool {
        self.current_chunk + 1 >= self.total()
    }
}

impl<'a> Iterator for ChunkIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let chunk_len = (self.data.len() - self.offset).min(self.chunk_size);
        let chunk = &self.data[self.offset..self.offset + chunk_len];
        self.offset += chunk_len;
        self.current_chunk += 1;

        Some(chunk)
    }
}
