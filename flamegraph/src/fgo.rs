//! Record-file codec.
//!
//! A `.fgo` file holds a single snapshot as gzip-compressed JSON. Decoding
//! sniffs the gzip magic so uncompressed recordings remain readable.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::{Frame, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Encodes a snapshot, optionally gzip-compressed.
pub fn encode(frame: &Frame, compress: bool) -> Result<Vec<u8>> {
    let json = frame.to_json()?;
    if !compress {
        return Ok(json);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Decodes a recorded snapshot, transparently inflating gzip input.
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;
        return Frame::from_json(&json);
    }
    Frame::from_json(bytes)
}
