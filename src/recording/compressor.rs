// src/recording/compressor.rs
//! gzip compression settings and helpers for NDJSON sinks

use crate::utils::errors::{CaptureError, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracing::debug;

/// gzip magic bytes
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// gzip compression level (0-9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// Fastest compression (level 1)
    pub const FAST: CompressionLevel = CompressionLevel(1);

    /// zlib default (level 6)
    pub const BALANCED: CompressionLevel = CompressionLevel(6);

    /// Best compression (level 9)
    pub const BEST: CompressionLevel = CompressionLevel(9);

    pub fn new(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(CaptureError::Config(format!(
                "compression level must be between 0 and 9, got {}",
                level
            )));
        }
        Ok(Self(level))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub(crate) fn to_flate2(self) -> Compression {
        Compression::new(self.0)
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel::BEST
    }
}

/// Wrap a byte sink in a gzip encoder at `level`
pub fn encoder<W: Write>(inner: W, level: CompressionLevel) -> GzEncoder<W> {
    debug!("Opening gzip stream at level {}", level.as_u32());
    GzEncoder::new(inner, level.to_flate2())
}

/// Wrap a byte source in a decoder that handles concatenated gzip members
pub fn decoder<R: Read>(inner: R) -> MultiGzDecoder<R> {
    MultiGzDecoder::new(inner)
}

/// True if `data` starts with the gzip magic bytes
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

/// Decompress a complete gzip buffer
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder(data).read_to_end(&mut out)?;

    debug!("Decompressed {} bytes -> {} bytes", data.len(), out.len());

    Ok(out)
}
