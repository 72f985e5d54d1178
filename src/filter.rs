//! Flate (zlib/deflate) stream filter
//!
//! The only filter the storage core applies itself: object-stream and
//! cross-reference-stream bodies are compressed as whole blocks.

use crate::error::{Error, Result};
use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use std::io::Read;

/// Decode flate-compressed data
pub fn decode_flate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::Parse(format!("FlateDecode failed: {}", e)))?;
    Ok(decompressed)
}

/// Encode data with flate (zlib/deflate)
pub fn encode_flate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let compression = match level {
        0 => Compression::none(),
        1..=3 => Compression::fast(),
        4..=6 => Compression::default(),
        _ => Compression::best(),
    };

    let mut encoder = ZlibEncoder::new(data, compression);
    let mut compressed = Vec::new();
    encoder
        .read_to_end(&mut compressed)
        .map_err(|e| Error::Generic(format!("FlateDecode encode failed: {}", e)))?;
    Ok(compressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flate_encode_decode() {
        let original = b"1 0 obj << /Type /Page >> endobj 1 0 obj << /Type /Page >> endobj \
                         1 0 obj << /Type /Page >> endobj 1 0 obj << /Type /Page >> endobj";

        let compressed = encode_flate(original, 6).unwrap();
        assert!(compressed.len() < original.len());

        let decompressed = decode_flate(&compressed).unwrap();
        assert_eq!(decompressed, original.as_slice());
    }

    #[test]
    fn test_flate_empty_data() {
        let empty: &[u8] = &[];
        let compressed = encode_flate(empty, 6).unwrap();
        let decompressed = decode_flate(&compressed).unwrap();
        assert_eq!(decompressed, empty);
    }

    #[test]
    fn test_flate_compression_levels() {
        let data = b"Test data for compression level testing";

        for level in [0, 3, 6, 9] {
            let compressed = encode_flate(data, level).unwrap();
            let decompressed = decode_flate(&compressed).unwrap();
            assert_eq!(decompressed, data);
        }
    }

    #[test]
    fn test_flate_garbage_input() {
        assert!(decode_flate(b"not zlib data at all").is_err());
    }
}
