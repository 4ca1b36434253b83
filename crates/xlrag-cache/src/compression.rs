//! Compression codecs for stored payloads.
//!
//! Every codec is lossless; the cache compares logical payloads, never the
//! stored bytes.

use crate::types::CompressionType;
use std::io::{Read, Write};
use xlrag_core::{Error, Result};

const ZSTD_LEVEL: i32 = 3;

/// Compress data using the specified algorithm.
pub fn compress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>> {
    let compressed = match algorithm {
        CompressionType::None => return Ok(data.to_vec()),
        CompressionType::Lz4 => return Ok(lz4_flex::compress_prepend_size(data)),
        CompressionType::Zstd => zstd::Encoder::new(Vec::new(), ZSTD_LEVEL).and_then(|mut enc| {
            enc.write_all(data)?;
            enc.finish()
        }),
        CompressionType::Gzip => {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(data).and_then(|()| enc.finish())
        }
    };
    compressed.map_err(|e| codec_error(algorithm, "compression", e))
}

/// Decompress data using the specified algorithm.
pub fn decompress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>> {
    let decompressed = match algorithm {
        CompressionType::None => return Ok(data.to_vec()),
        CompressionType::Lz4 => {
            return lz4_flex::decompress_size_prepended(data)
                .map_err(|e| codec_error(algorithm, "decompression", e));
        }
        CompressionType::Zstd => zstd::Decoder::new(data).and_then(read_all),
        CompressionType::Gzip => read_all(flate2::read::GzDecoder::new(data)),
    };
    decompressed.map_err(|e| codec_error(algorithm, "decompression", e))
}

fn read_all(mut reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut output = Vec::new();
    reader.read_to_end(&mut output)?;
    Ok(output)
}

fn codec_error(algorithm: CompressionType, stage: &str, e: impl std::fmt::Display) -> Error {
    Error::Compression(format!("{:?} {} failed: {}", algorithm, stage, e))
}

/// Compress `data` unless it is shorter than `min_bytes` or compression
/// does not shrink it. Returns the stored bytes and the codec actually used.
pub fn encode(
    data: &[u8],
    algorithm: CompressionType,
    min_bytes: usize,
) -> Result<(Vec<u8>, CompressionType)> {
    if algorithm == CompressionType::None || data.len() < min_bytes {
        return Ok((data.to_vec(), CompressionType::None));
    }
    let compressed = compress(data, algorithm)?;
    if compressed.len() >= data.len() {
        return Ok((data.to_vec(), CompressionType::None));
    }
    Ok((compressed, algorithm))
}
