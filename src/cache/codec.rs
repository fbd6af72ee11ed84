//! Body codec for cached payloads
//!
//! Bodies are written as gzip. Reads also accept raw deflate streams left behind
//! by older writers, including gzip members whose header or trailer is damaged.

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_HEADER_LEN: usize = 10;
const GZIP_TRAILER_LEN: usize = 8;

/// Compresses a body with gzip framing
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses a stored body, falling back to raw deflate for legacy rows
///
/// An empty buffer decodes to an empty body.
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    if data.starts_with(&GZIP_MAGIC) {
        if let Ok(body) = gunzip(data) {
            return Ok(body);
        }
        if data.len() > GZIP_HEADER_LEN + GZIP_TRAILER_LEN {
            if let Ok(body) = inflate(&data[GZIP_HEADER_LEN..data.len() - GZIP_TRAILER_LEN]) {
                return Ok(body);
            }
        }
    }

    inflate(data).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("body is neither gzip nor raw deflate: {}", e),
        )
    })
}

fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut body = Vec::new();
    decoder.read_to_end(&mut body)?;
    Ok(body)
}

fn inflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut body = Vec::new();
    decoder.read_to_end(&mut body)?;
    Ok(body)
}
