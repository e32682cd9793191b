//! Diagnostic dump de-obfuscation.
//!
//! A dump pulled from the unit is a single-byte XOR stream. Its first byte
//! is the key masked with `0x2d`; every following byte is XORed with the key.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::constants::DIAGNOSTIC_KEY_MASK;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Recover the plaintext of a diagnostic stream. Empty in, empty out.
pub fn decode(stream: &[u8]) -> Vec<u8> {
    let Some((&first, rest)) = stream.split_first() else {
        return Vec::new();
    };
    let key = first ^ DIAGNOSTIC_KEY_MASK;
    rest.iter().map(|b| b ^ key).collect()
}

pub fn decode_to_string(stream: &[u8]) -> String {
    String::from_utf8_lossy(&decode(stream)).into_owned()
}

/// Obfuscate `plaintext` with `key`; `decode` reverses it.
pub fn encode(plaintext: &[u8], key: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(plaintext.len() + 1);
    out.push(key ^ DIAGNOSTIC_KEY_MASK);
    out.extend(plaintext.iter().map(|b| b ^ key));
    out
}

pub fn try_decode_file(path: impl AsRef<Path>) -> Result<String, DecodeError> {
    let path = path.as_ref();
    let raw = std::fs::read(path).map_err(|source| DecodeError::Read {
        path: path.display().to_string(),
        source,
    })?;
    debug!(path = %path.display(), bytes = raw.len(), "decoding diagnostics");
    Ok(decode_to_string(&raw))
}

/// Best-effort file decode: an unreadable file yields an empty string.
pub fn decode_file(path: impl AsRef<Path>) -> String {
    match try_decode_file(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "diagnostics unavailable");
            String::new()
        }
    }
}
