//! Compressed Payload Codec
//!
//! Some exchanges ship market data as base64 text wrapping a raw deflate
//! stream (no zlib or gzip header) of a JSON document.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::application::ports::MapperError;

/// Upper bound on an inflated document.
pub const MAX_INFLATED_BYTES: usize = 16 * 1024 * 1024;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Input is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Deflate stream is corrupt or truncated.
    #[error("inflate failed: {0}")]
    Inflate(#[from] std::io::Error),

    /// The inflated document exceeds the size limit.
    #[error("inflated payload exceeds {0} bytes")]
    TooLarge(usize),

    /// Inflated bytes are not a JSON document.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CodecError> for MapperError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Json(e) => Self::Json(e),
            other => Self::Decompression(other.to_string()),
        }
    }
}

/// Decode base64, inflate and parse the JSON document.
///
/// # Errors
///
/// Returns [`CodecError`] at the first failing stage.
pub fn decode_compressed(encoded: &str) -> Result<serde_json::Value, CodecError> {
    decode_compressed_with_limit(encoded, MAX_INFLATED_BYTES)
}

/// [`decode_compressed`] with an explicit bound on the inflated size.
///
/// # Errors
///
/// Returns [`CodecError::TooLarge`] once more than `limit` bytes inflate,
/// otherwise as [`decode_compressed`].
pub fn decode_compressed_with_limit(
    encoded: &str,
    limit: usize,
) -> Result<serde_json::Value, CodecError> {
    let compressed = STANDARD.decode(encoded.trim())?;
    let mut inflated = Vec::with_capacity(compressed.len().saturating_mul(4).min(limit));
    let bound = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    DeflateDecoder::new(compressed.as_slice())
        .take(bound)
        .read_to_end(&mut inflated)?;
    if inflated.len() > limit {
        return Err(CodecError::TooLarge(limit));
    }
    Ok(serde_json::from_slice(&inflated)?)
}

/// Serialize, deflate and base64-encode a JSON document.
///
/// # Errors
///
/// Returns [`CodecError`] if serialization or compression fails.
pub fn encode_compressed(value: &serde_json::Value) -> Result<String, CodecError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&serde_json::to_vec(value)?)?;
    Ok(STANDARD.encode(encoder.finish()?))
}
