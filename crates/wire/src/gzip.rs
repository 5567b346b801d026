//! Gzip helpers for HTTP bodies. gRPC compression is handled by the
//! transport itself.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use pulse_core::PulseError;

pub fn compress(data: &[u8]) -> Result<Vec<u8>, PulseError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, PulseError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| PulseError::Decode(format!("gzip: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let body = br#"[{"id":"m1","type":"counter","delta":1}]"#;
        let packed = compress(body).unwrap();
        assert_eq!(decompress(&packed).unwrap(), body);
    }

    #[test]
    fn test_compresses_repetitive_payloads() {
        let body = vec![b'a'; 16 * 1024];
        let packed = compress(&body).unwrap();
        assert!(packed.len() < body.len() / 10);
    }

    #[test]
    fn test_garbage_input_is_decode_error() {
        assert!(matches!(
            decompress(b"definitely not gzip"),
            Err(PulseError::Decode(_))
        ));
    }
}
