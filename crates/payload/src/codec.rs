//! Payload byte encoding.
//!
//! Every stored payload starts with a one-byte tag: [`TAG_RAW`] for bytes
//! stored as given, [`TAG_ZSTD`] for a zstd frame. Reads accept both tags
//! whatever the current setting, so a datastore can turn compression on or
//! off without rewriting old payloads.

use std::io::{Read, Write};

use zstd::stream::read::Decoder;
use zstd::stream::write::Encoder;

use crate::error::{BackendError, PayloadError, PayloadResult};

/// Tag of an uncompressed payload.
pub const TAG_RAW: u8 = 0;

/// Tag of a zstd-compressed payload.
pub const TAG_ZSTD: u8 = 1;

/// Default zstd level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Encodes payloads for storage and decodes them on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadCodec {
    compress: bool,
    level: i32,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::raw()
    }
}

impl PayloadCodec {
    /// Stores payloads uncompressed.
    pub fn raw() -> Self {
        Self {
            compress: false,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Compresses payloads with zstd at `level`.
    pub fn zstd(level: i32) -> Self {
        Self {
            compress: true,
            level,
        }
    }

    /// Builds a codec from the common store settings.
    pub fn new(compress: bool, level: i32) -> Self {
        Self { compress, level }
    }

    /// Returns true if new payloads are compressed.
    pub fn compresses(&self) -> bool {
        self.compress
    }

    /// Wraps `payload` in the storage envelope.
    pub fn encode(&self, payload: &[u8]) -> PayloadResult<Vec<u8>> {
        if !self.compress {
            let mut out = Vec::with_capacity(payload.len() + 1);
            out.push(TAG_RAW);
            out.extend_from_slice(payload);
            return Ok(out);
        }

        let mut out = vec![TAG_ZSTD];
        let mut encoder = Encoder::new(&mut out, self.level).map_err(compression_error)?;
        encoder.write_all(payload).map_err(compression_error)?;
        encoder.finish().map_err(compression_error)?;
        Ok(out)
    }

    /// Unwraps a stored envelope.
    pub fn decode(&self, stored: &[u8]) -> PayloadResult<Vec<u8>> {
        match stored.split_first() {
            Some((&TAG_RAW, body)) => Ok(body.to_vec()),
            Some((&TAG_ZSTD, body)) => {
                let mut decoder = Decoder::new(body).map_err(compression_error)?;
                let mut out = Vec::new();
                decoder.read_to_end(&mut out).map_err(compression_error)?;
                Ok(out)
            }
            Some((tag, _)) => Err(BackendError::Serialization {
                message: format!("unknown payload envelope tag {tag}"),
            }
            .into()),
            None => Err(BackendError::Serialization {
                message: "empty payload envelope".to_string(),
            }
            .into()),
        }
    }
}

fn compression_error(err: std::io::Error) -> PayloadError {
    BackendError::Serialization {
        message: format!("zstd: {err}"),
    }
    .into()
}
