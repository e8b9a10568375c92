//! Content decompression.
//!
//! Generation 4 stores zstd frames, recognisable by their 4-byte magic number.
//! Generation 3 keeps app-message XML in a separate column as a bare LZ4 block
//! whose only framing is the column length. The codec is always picked by looking
//! at the bytes; the caller only says whether a bare block is possible.

use tracing::debug;

use crate::metrics::MetricsCollector;

/// Zstandard frame magic number
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Largest output accepted from a bare LZ4 block
const LZ4_MAX_OUTPUT: usize = 64 * 1024 * 1024;

/// Codec detected for a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Zstandard frame
    Zstd,
    /// Bare LZ4 block
    Lz4Block,
    /// Not compressed
    Plain,
}

/// Pick a codec from the payload bytes
#[must_use]
pub fn sniff(bytes: &[u8], block_possible: bool) -> Codec {
    if bytes.starts_with(&ZSTD_MAGIC) {
        Codec::Zstd
    } else if block_possible && !bytes.is_empty() {
        Codec::Lz4Block
    } else {
        Codec::Plain
    }
}

/// Result of turning a stored payload into text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inflated {
    /// Decoded text
    pub text: String,
    /// True when decompression failed and the raw bytes were used instead
    pub fallback: bool,
}

/// Decompress a zstd frame
pub fn zstd_decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    zstd::stream::decode_all(bytes)
}

/// Decompress a bare LZ4 block of unknown output size
pub fn lz4_block_decompress(bytes: &[u8]) -> Result<Vec<u8>, lz4_flex::block::DecompressError> {
    let mut capacity = bytes.len().saturating_mul(4).max(256);
    loop {
        match lz4_flex::block::decompress(bytes, capacity) {
            Ok(out) => return Ok(out),
            Err(lz4_flex::block::DecompressError::OutputTooSmall { expected, .. })
                if expected <= LZ4_MAX_OUTPUT && expected > capacity =>
            {
                capacity = expected;
            }
            Err(lz4_flex::block::DecompressError::OutputTooSmall { .. }) if capacity < LZ4_MAX_OUTPUT => {
                capacity = capacity.saturating_mul(4).min(LZ4_MAX_OUTPUT);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Turn a stored payload into text.
///
/// On decompression failure the raw bytes are used if they are valid UTF-8;
/// otherwise the text is empty so binary never ends up in message content.
#[must_use]
pub fn inflate(bytes: &[u8], block_possible: bool) -> Inflated {
    let decoded = match sniff(bytes, block_possible) {
        Codec::Plain => {
            return Inflated {
                text: String::from_utf8_lossy(bytes).into_owned(),
                fallback: false,
            }
        }
        Codec::Zstd => zstd_decompress(bytes).map_err(|e| e.to_string()),
        Codec::Lz4Block => lz4_block_decompress(bytes).map_err(|e| e.to_string()),
    };

    match decoded {
        Ok(out) => Inflated {
            text: String::from_utf8_lossy(&out).into_owned(),
            fallback: false,
        },
        Err(e) => {
            debug!(error = %e, len = bytes.len(), "Decompression failed, using raw bytes");
            MetricsCollector::default().record_decode_fallback("decompress");
            Inflated {
                text: String::from_utf8(bytes.to_vec()).unwrap_or_default(),
                fallback: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff() {
        let framed = zstd::stream::encode_all(&b"hello"[..], 3).unwrap();
        assert_eq!(sniff(&framed, false), Codec::Zstd);
        assert_eq!(sniff(&framed, true), Codec::Zstd);
        assert_eq!(sniff(b"hello", false), Codec::Plain);
        assert_eq!(sniff(b"hello", true), Codec::Lz4Block);
        assert_eq!(sniff(b"", true), Codec::Plain);
    }

    #[test]
    fn test_zstd_frame_is_inflated() {
        let framed = zstd::stream::encode_all("<msg>你好</msg>".as_bytes(), 3).unwrap();
        let out = inflate(&framed, false);
        assert_eq!(out.text, "<msg>你好</msg>");
        assert!(!out.fallback);
    }

    #[test]
    fn test_plain_passes_through() {
        let out = inflate(b"just text", false);
        assert_eq!(out.text, "just text");
        assert!(!out.fallback);
    }

    #[test]
    fn test_lz4_block_with_large_ratio() {
        let xml = format!("<appmsg><title>{}</title></appmsg>", "a".repeat(10_000));
        let block = lz4_flex::block::compress(xml.as_bytes());
        assert!(block.len() * 4 < xml.len());
        let out = inflate(&block, true);
        assert_eq!(out.text, xml);
    }

    #[test]
    fn test_corrupt_zstd_falls_back_without_binary() {
        let mut bad = ZSTD_MAGIC.to_vec();
        bad.extend_from_slice(&[0xff, 0xfe, 0x00, 0x01]);
        let out = inflate(&bad, false);
        assert!(out.fallback);
        assert!(out.text.is_empty());
    }
}
