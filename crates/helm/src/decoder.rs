//! Decoding of the opaque release payload envelope.

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use thiserror::Error;

use chronologist::ReleaseEvent;

use crate::release::{event_from_release, Release};

/// Gzip member header: magic bytes plus the deflate compression method.
const MAGIC_GZIP: [u8; 3] = [0x1f, 0x8b, 0x08];

/// A payload-shape fault.
///
/// Decode errors are structural, not transient: the same payload fails the
/// same way on every attempt, so callers must not retry them indefinitely.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was not valid base64.
    #[error("decode base64 release data: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload announced gzip compression but did not decompress.
    #[error("decompress release data: {0}")]
    Decompress(#[from] std::io::Error),

    /// The decompressed bytes did not match the release document schema.
    #[error("deserialize release document: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Decodes an opaque payload into a [`Release`].
///
/// `data` must be a base64 encoding of either a gzipped or a plain release
/// document. Payloads written before compression was introduced carry no gzip
/// header and are deserialized as-is.
pub fn decode_release(data: &str) -> Result<Release, DecodeError> {
    let bytes = BASE64.decode(data)?;

    let bytes = if bytes.get(..3) == Some(&MAGIC_GZIP[..]) {
        let mut decompressed = Vec::new();
        GzDecoder::new(bytes.as_slice()).read_to_end(&mut decompressed)?;
        decompressed
    } else {
        bytes
    };

    Ok(serde_json::from_slice(&bytes)?)
}

/// Decodes an opaque payload straight into a release event.
///
/// The same payload always yields the same event.
pub fn event_from_raw_release(data: &str) -> Result<ReleaseEvent, DecodeError> {
    let release = decode_release(data)?;
    Ok(event_from_release(&release))
}
