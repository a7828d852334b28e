//! LZ4 and Zstd compression for stored payloads.
//!
//! Compressed output is framed: `b"TVZ"` magic, one algorithm byte, then the codec
//! payload. `decompress` passes anything without that frame through unchanged, so it
//! is safe to call on plain bytes.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};

const FRAME_MAGIC: &[u8; 3] = b"TVZ";
const FRAME_HEADER_LEN: usize = 4;
const ALGO_LZ4: u8 = 1;
const ALGO_ZSTD: u8 = 2;

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompressionAlgorithm {
    /// No compression (passthrough)
    None,
    /// LZ4 block format with prepended size; fast, the default
    #[default]
    Lz4,
    /// Zstandard; better ratio on large structured values
    Zstd {
        /// Compression level (1=fastest, 19=best ratio, 3=balanced default)
        level: i32,
    },
}

/// Compress data with the given algorithm. Returns framed bytes (or the input for `None`).
pub fn compress(data: &[u8], algo: CompressionAlgorithm) -> Result<Vec<u8>, StorageError> {
    let (id, body) = match algo {
        CompressionAlgorithm::None => return Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => (ALGO_LZ4, lz4_flex::compress_prepend_size(data)),
        CompressionAlgorithm::Zstd { level } => (
            ALGO_ZSTD,
            zstd::encode_all(data, level)
                .map_err(|e| StorageError::CompressionFailed(e.to_string()))?,
        ),
    };
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(FRAME_MAGIC);
    out.push(id);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decompress framed data. Bytes that carry no frame header are returned unchanged.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    if data.len() < FRAME_HEADER_LEN || &data[..3] != FRAME_MAGIC {
        return Ok(data.to_vec());
    }
    let body = &data[FRAME_HEADER_LEN..];
    match data[3] {
        ALGO_LZ4 => lz4_flex::decompress_size_prepended(body)
            .map_err(|e| StorageError::DecompressionFailed(e.to_string())),
        ALGO_ZSTD => {
            zstd::decode_all(body).map_err(|e| StorageError::DecompressionFailed(e.to_string()))
        }
        _ => Ok(data.to_vec()),
    }
}

/// Check whether compressing data is worthwhile.
/// Returns false if a 1 KiB sample appears already compressed or random (high entropy).
pub fn is_compressible(data: &[u8]) -> bool {
    if data.len() < 64 {
        return true;
    }
    let sample = &data[..data.len().min(1024)];
    let compressed = lz4_flex::compress_prepend_size(sample);
    (compressed.len() as f64) < (sample.len() as f64 * 0.95)
}
