//! Cache entry envelope.
//!
//! A [`CacheEntry`] holds the serialized [`QueryResult`] together with the
//! metadata the read path needs: which encoding the payload uses, its size
//! before and after compression, and when it expires. Payloads strictly
//! larger than the compression threshold are gzip-compressed.
//!
//! # Binary Format
//!
//! Stores that persist raw bytes use a fixed 19-byte header:
//! - Bytes 0-1: magic (`b"QY"`)
//! - Byte 2: encoding (0 = identity, 1 = gzip)
//! - Bytes 3-10: `expires_at` as Unix milliseconds, i64 little-endian
//! - Bytes 11-18: uncompressed payload length, u64 little-endian
//! - Bytes 19..: payload

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use quarry_core::{QueryResult, StoreError};
use serde::{Deserialize, Serialize};

use super::key::CacheKey;
use super::ttl::ClampedTtl;

/// Magic bytes opening every framed entry.
pub const FRAME_MAGIC: [u8; 2] = *b"QY";

/// Size of the framing header in bytes.
pub const FRAME_HEADER_LEN: usize = 19;

/// How a payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// Plain JSON.
    Identity,
    /// Gzip-compressed JSON.
    Gzip,
}

impl PayloadEncoding {
    fn to_byte(self) -> u8 {
        match self {
            Self::Identity => 0,
            Self::Gzip => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Identity),
            1 => Some(Self::Gzip),
            _ => None,
        }
    }
}

/// Encoding flag and sizes of a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub encoding: PayloadEncoding,
    /// Length of the serialized result before compression.
    pub raw_len: u64,
    /// Length of the payload as stored.
    pub stored_len: u64,
}

/// The persisted unit of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Vec<u8>,
    pub metadata: EntryMetadata,
    pub expires_at: DateTime<Utc>,
}

fn corrupt(reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        reason: reason.into(),
    }
}

impl CacheEntry {
    /// Serialize a result into an entry expiring `ttl` after `now`.
    ///
    /// The result is fully serialized (and compressed) before an entry
    /// exists, so a store never sees a half-built value.
    pub fn encode(
        key: CacheKey,
        result: &QueryResult,
        ttl: ClampedTtl,
        now: DateTime<Utc>,
        compression_threshold: usize,
    ) -> Result<Self, StoreError> {
        let raw = serde_json::to_vec(result).map_err(|e| StoreError::Encode {
            reason: e.to_string(),
        })?;
        let raw_len = raw.len() as u64;

        let (encoding, payload) = if raw.len() > compression_threshold {
            (PayloadEncoding::Gzip, gzip(&raw)?)
        } else {
            (PayloadEncoding::Identity, raw)
        };

        Ok(Self {
            key,
            metadata: EntryMetadata {
                encoding,
                raw_len,
                stored_len: payload.len() as u64,
            },
            payload,
            expires_at: now + ttl.as_chrono(),
        })
    }

    /// Rebuild the stored result, honoring the encoding flag.
    pub fn decode(&self) -> Result<QueryResult, StoreError> {
        let raw = match self.metadata.encoding {
            PayloadEncoding::Identity => self.payload.clone(),
            PayloadEncoding::Gzip => gunzip(&self.payload)?,
        };
        if raw.len() as u64 != self.metadata.raw_len {
            return Err(corrupt(format!(
                "payload length {} does not match recorded length {}",
                raw.len(),
                self.metadata.raw_len
            )));
        }
        serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))
    }

    /// Whether the entry is no longer eligible to be served at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Frame the entry for a byte-oriented store.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        frame.extend_from_slice(&FRAME_MAGIC);
        frame.push(self.metadata.encoding.to_byte());
        frame.extend_from_slice(&self.expires_at.timestamp_millis().to_le_bytes());
        frame.extend_from_slice(&self.metadata.raw_len.to_le_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    /// Parse a framed entry read back under `key`.
    pub fn from_frame(key: CacheKey, frame: &[u8]) -> Result<Self, StoreError> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(corrupt(format!("frame too short: {} bytes", frame.len())));
        }
        if frame[0..2] != FRAME_MAGIC {
            return Err(corrupt("bad frame magic"));
        }
        let encoding = PayloadEncoding::from_byte(frame[2])
            .ok_or_else(|| corrupt(format!("unknown encoding byte {}", frame[2])))?;

        let expires_bytes: [u8; 8] = frame[3..11]
            .try_into()
            .map_err(|_| corrupt("invalid expiry"))?;
        let expires_at = DateTime::from_timestamp_millis(i64::from_le_bytes(expires_bytes))
            .ok_or_else(|| corrupt("expiry out of range"))?;

        let raw_len_bytes: [u8; 8] = frame[11..19]
            .try_into()
            .map_err(|_| corrupt("invalid length"))?;
        let payload = frame[FRAME_HEADER_LEN..].to_vec();

        Ok(Self {
            key,
            metadata: EntryMetadata {
                encoding,
                raw_len: u64::from_le_bytes(raw_len_bytes),
                stored_len: payload.len() as u64,
            },
            payload,
            expires_at,
        })
    }
}

fn gzip(raw: &[u8]) -> Result<Vec<u8>, StoreError> {
    let encode_error = |e: std::io::Error| StoreError::Encode {
        reason: e.to_string(),
    };
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).map_err(encode_error)?;
    encoder.finish().map_err(encode_error)
}

fn gunzip(compressed: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| corrupt(format!("gzip: {e}")))?;
    Ok(raw)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ttl::TtlPolicy;
    use quarry_core::{row, Provenance, Scalar};
    use quarry_test_utils::fixtures::bulky_rows;

    fn sample_result(rows: Vec<quarry_core::Row>) -> QueryResult {
        let mut result = QueryResult::new(
            "q_demo",
            Provenance {
                source_kind: "csv".into(),
                dataset_id: "q_demo".into(),
                locator: "demo.csv".into(),
                fields: vec!["sector".into(), "value".into()],
                license: "CC-BY-4.0".into(),
            },
        );
        result.rows = rows;
        result.push_warning("freshness_parse_error: query 'q_demo' has no as-of signal");
        result
    }

    fn ttl() -> ClampedTtl {
        TtlPolicy::default().resolve(Some(120)).expect("enabled")
    }

    fn key() -> CacheKey {
        CacheKey::derive("q_demo", "csv", &Default::default())
    }

    #[test]
    fn test_small_payload_stays_identity() {
        let result = sample_result(vec![row([("value", Scalar::Int(1))])]);
        let entry = CacheEntry::encode(key(), &result, ttl(), Utc::now(), 8192).expect("encode");

        assert_eq!(entry.metadata.encoding, PayloadEncoding::Identity);
        assert_eq!(entry.metadata.raw_len, entry.metadata.stored_len);
        assert_eq!(entry.decode().expect("decode"), result);
    }

    #[test]
    fn test_large_payload_is_compressed() {
        let result = sample_result(bulky_rows(16 * 1024));
        let entry = CacheEntry::encode(key(), &result, ttl(), Utc::now(), 8192).expect("encode");

        assert_eq!(entry.metadata.encoding, PayloadEncoding::Gzip);
        assert!(entry.metadata.raw_len > 8192);
        assert!(entry.metadata.stored_len < entry.metadata.raw_len);
        assert_eq!(entry.decode().expect("decode"), result);
    }

    #[test]
    fn test_threshold_is_strict() {
        let result = sample_result(vec![]);
        let raw_len = serde_json::to_vec(&result).expect("serialize").len();

        let at = CacheEntry::encode(key(), &result, ttl(), Utc::now(), raw_len).expect("encode");
        assert_eq!(at.metadata.encoding, PayloadEncoding::Identity);

        let below =
            CacheEntry::encode(key(), &result, ttl(), Utc::now(), raw_len - 1).expect("encode");
        assert_eq!(below.metadata.encoding, PayloadEncoding::Gzip);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let entry = CacheEntry::encode(key(), &sample_result(vec![]), ttl(), now, 8192)
            .expect("encode");
        assert_eq!(entry.expires_at, now + chrono::Duration::seconds(120));
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + chrono::Duration::seconds(120)));
    }

    #[test]
    fn test_frame_round_trip() {
        let result = sample_result(bulky_rows(10_000));
        let entry = CacheEntry::encode(key(), &result, ttl(), Utc::now(), 8192).expect("encode");

        let frame = entry.to_frame();
        assert_eq!(&frame[0..2], b"QY");
        let parsed = CacheEntry::from_frame(key(), &frame).expect("parse frame");

        assert_eq!(parsed.metadata, entry.metadata);
        // Frames keep millisecond precision.
        assert_eq!(
            parsed.expires_at.timestamp_millis(),
            entry.expires_at.timestamp_millis()
        );
        assert_eq!(parsed.decode().expect("decode"), result);
    }

    #[test]
    fn test_truncated_and_garbled_frames_are_corrupt() {
        let entry = CacheEntry::encode(key(), &sample_result(vec![]), ttl(), Utc::now(), 8192)
            .expect("encode");
        let frame = entry.to_frame();

        let short = CacheEntry::from_frame(key(), &frame[..10]);
        assert!(matches!(short, Err(StoreError::Corrupt { .. })));

        let mut bad_magic = frame.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            CacheEntry::from_frame(key(), &bad_magic),
            Err(StoreError::Corrupt { .. })
        ));

        let mut bad_encoding = frame;
        bad_encoding[2] = 9;
        assert!(matches!(
            CacheEntry::from_frame(key(), &bad_encoding),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_garbled_gzip_payload_is_corrupt() {
        let result = sample_result(bulky_rows(16 * 1024));
        let mut entry =
            CacheEntry::encode(key(), &result, ttl(), Utc::now(), 8192).expect("encode");
        entry.payload.truncate(entry.payload.len() / 2);

        assert!(matches!(entry.decode(), Err(StoreError::Corrupt { .. })));
    }
}
