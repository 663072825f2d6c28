//! Compression Codec Module
//!
//! Narrow compress/decompress interface for the persisted cache envelope.
//!
//! Compressed payloads are stored as `"gz:" + base64(gzip(json))`. A stored
//! string without the marker is a legacy uncompressed payload and is passed
//! through unchanged, so older caches stay readable.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, SyncError};

// == Constants ==
/// Prefix marking a compressed payload.
pub const COMPRESSION_MARKER: &str = "gz:";

/// Encodes a serialized entry for storage.
///
/// Payloads are compressed only when the compressed envelope is actually
/// smaller; short payloads where the base64 overhead dominates are stored
/// as plain text without the marker.
pub fn encode(plain: &str) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plain.as_bytes())?;
    let compressed = encoder.finish()?;

    let envelope = format!("{}{}", COMPRESSION_MARKER, BASE64.encode(compressed));
    if envelope.len() < plain.len() {
        Ok(envelope)
    } else {
        Ok(plain.to_string())
    }
}

/// Decodes a stored payload back to its serialized form.
///
/// Detects the compression marker; payloads without it are returned as-is.
pub fn decode(stored: &str) -> Result<String> {
    let Some(encoded) = stored.strip_prefix(COMPRESSION_MARKER) else {
        return Ok(stored.to_string());
    };

    let compressed = BASE64
        .decode(encoded)
        .map_err(|e| SyncError::Storage(format!("invalid base64 envelope: {}", e)))?;

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut plain = String::new();
    decoder.read_to_string(&mut plain)?;
    Ok(plain)
}
