//! Compression for the stored page-content column.
//!
//! Every compressed value carries a 4-byte little-endian header holding the
//! uncompressed length, followed by a zlib stream. Decompression checks the
//! zlib checksum and the declared length, so a damaged value is reported as
//! [`Error::Corrupt`] instead of yielding different bytes.

use std::io::{Read, Write};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

use crate::error::{Error, Result};

const HEADER_SIZE: usize = 4;

/// Upper bound on the buffer reserved from an untrusted length header.
const MAX_RESERVE: usize = 1 << 20;

/// A symmetric transform applied to large text columns.
pub trait ColumnCodec: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Length-prefixed zlib.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCodec {
    level: Compression,
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl ZlibCodec {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl ColumnCodec for ZlibCodec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let len = u32::try_from(data.len()).map_err(|_| {
            Error::Config(format!(
                "column value of {} bytes is too large to compress",
                data.len()
            ))
        })?;

        let mut out = Vec::with_capacity(HEADER_SIZE + data.len() / 2);
        out.extend_from_slice(&len.to_le_bytes());

        let mut encoder = ZlibEncoder::new(out, self.level);
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corrupt(format!(
                "value is {} bytes, shorter than the length header",
                data.len()
            )));
        }

        let (header, stream) = data.split_at(HEADER_SIZE);
        let mut len_bytes = [0u8; HEADER_SIZE];
        len_bytes.copy_from_slice(header);
        let expected = u32::from_le_bytes(len_bytes) as usize;

        // One byte past the declared length is enough to detect overflow.
        let mut out = Vec::with_capacity(expected.min(MAX_RESERVE));
        ZlibDecoder::new(stream)
            .take(expected as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| Error::Corrupt(e.to_string()))?;

        if out.len() > expected {
            return Err(Error::Corrupt(format!(
                "stream is longer than the declared {expected} bytes"
            )));
        }
        if out.len() != expected {
            return Err(Error::Corrupt(format!(
                "expected {expected} bytes, stream produced {}",
                out.len()
            )));
        }

        Ok(out)
    }
}
