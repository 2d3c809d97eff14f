//! Canonical serialization, hashing and gzip compression for content payloads

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use folio_core::{CompressionConfig, CompressionType, CoreError, CoreResult};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Encodes content for storage and verifies it on the way back.
///
/// Serialization is canonical: object keys are written in sorted order at
/// every depth, so two values that differ only in key insertion order produce
/// identical bytes and therefore identical hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentCodec {
    config: CompressionConfig,
}

impl ContentCodec {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Canonical JSON bytes of `content`. Absent content serializes as `null`.
    pub fn serialize(&self, content: Option<&Value>) -> CoreResult<Bytes> {
        let mut out = Vec::new();
        match content {
            Some(value) => write_canonical(value, &mut out)?,
            None => out.extend_from_slice(b"null"),
        }
        Ok(Bytes::from(out))
    }

    /// SHA-256 hex digest of the canonical serialization.
    pub fn hash(&self, content: Option<&Value>) -> CoreResult<String> {
        Ok(checksum(&self.serialize(content)?))
    }

    /// Parses stored bytes back into a value. Unparseable bytes are corruption.
    pub fn deserialize(&self, bytes: &[u8], locator: &str) -> CoreResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| {
            CoreError::corrupted(locator, format!("stored content is not valid JSON: {e}"))
        })
    }

    /// Gzip-compresses `data` when that saves at least `min_savings_bytes`.
    pub fn compress(&self, data: &[u8]) -> CoreResult<(Bytes, CompressionType)> {
        if !self.config.enabled {
            return Ok((Bytes::copy_from_slice(data), CompressionType::None));
        }

        let mut encoder = GzEncoder::new(Vec::new(), compression_level(self.config.level));
        encoder
            .write_all(data)
            .map_err(|e| CoreError::SerializationError(format!("Gzip compression failed: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CoreError::SerializationError(format!("Gzip finish failed: {e}")))?;

        let savings = (data.len() as u64).saturating_sub(compressed.len() as u64);
        if compressed.len() < data.len() && savings >= self.config.min_savings_bytes {
            Ok((Bytes::from(compressed), CompressionType::Gzip))
        } else {
            Ok((Bytes::copy_from_slice(data), CompressionType::None))
        }
    }

    /// Reverses [`compress`](Self::compress). Failure is `ContentCorrupted`.
    pub fn decompress(
        &self,
        data: &[u8],
        compression: CompressionType,
        locator: &str,
    ) -> CoreResult<Bytes> {
        match compression {
            CompressionType::None => Ok(Bytes::copy_from_slice(data)),
            CompressionType::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut decompressed = Vec::new();
                decoder.read_to_end(&mut decompressed).map_err(|e| {
                    CoreError::corrupted(locator, format!("gzip decompression failed: {e}"))
                })?;
                Ok(Bytes::from(decompressed))
            }
        }
    }
}

/// SHA-256 hex digest of raw bytes.
pub fn checksum(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn compression_level(level: u32) -> Compression {
    match level {
        0 => Compression::none(),
        1 => Compression::fast(),
        9 => Compression::best(),
        n => Compression::new(n),
    }
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> CoreResult<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push(b'{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(item, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_ignores_key_order() {
        let codec = ContentCodec::default();
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": null, "y": [1, 2]}, "b": 1}"#).unwrap();

        assert_eq!(codec.hash(Some(&a)).unwrap(), codec.hash(Some(&b)).unwrap());
        assert_eq!(
            codec.serialize(Some(&a)).unwrap().as_ref(),
            br#"{"a":{"x":null,"y":[1,2]},"b":1}"#
        );
    }

    #[test]
    fn test_hash_differs_for_different_content() {
        let codec = ContentCodec::default();
        assert_ne!(
            codec.hash(Some(&json!({"word": "run"}))).unwrap(),
            codec.hash(Some(&json!({"word": "ran"}))).unwrap()
        );
        // Absent content hashes like JSON null.
        assert_eq!(
            codec.hash(None).unwrap(),
            codec.hash(Some(&Value::Null)).unwrap()
        );
        assert_eq!(codec.hash(None).unwrap().len(), 64);
    }

    #[test]
    fn test_compress_repetitive_data() {
        let codec = ContentCodec::default();
        let data = vec![b'a'; 10_000];

        let (compressed, compression) = codec.compress(&data).unwrap();
        assert_eq!(compression, CompressionType::Gzip);
        assert!(compressed.len() < data.len() / 10);

        let restored = codec
            .decompress(&compressed, compression, "test/key/1.0.0")
            .unwrap();
        assert_eq!(restored.as_ref(), data.as_slice());
    }

    #[test]
    fn test_small_savings_keep_original() {
        let codec = ContentCodec::default();
        let data = b"short payload that gzip cannot shrink by 64 bytes";

        let (stored, compression) = codec.compress(data).unwrap();
        assert_eq!(compression, CompressionType::None);
        assert_eq!(stored.as_ref(), data);
    }

    #[test]
    fn test_compression_disabled() {
        let codec = ContentCodec::new(CompressionConfig {
            enabled: false,
            ..CompressionConfig::default()
        });
        let (stored, compression) = codec.compress(&vec![0u8; 4096]).unwrap();
        assert_eq!(compression, CompressionType::None);
        assert_eq!(stored.len(), 4096);
    }

    #[test]
    fn test_decompress_garbage_is_corruption() {
        let codec = ContentCodec::default();
        let err = codec
            .decompress(b"definitely not gzip", CompressionType::Gzip, "ns/id/1.0.0")
            .unwrap_err();
        assert!(matches!(err, CoreError::ContentCorrupted { .. }));
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
