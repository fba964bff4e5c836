//! Byte encoding of [`SaveRecord`] for the local file and the remote slot.
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use thiserror::Error;

use crate::record::SaveRecord;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("save payload is empty")]
    Empty,
    #[error("save payload is not a valid record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a record as UTF-8 JSON.
///
/// # Errors
///
/// Returns an error only if serialization fails, which cannot happen for
/// the plain data in [`SaveRecord`] unless a float is non-finite.
pub fn encode(record: &SaveRecord) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(record)?)
}

/// Decode a record, rejecting empty payloads.
///
/// # Errors
///
/// Returns [`CodecError::Empty`] for an empty slice and
/// [`CodecError::Json`] when the bytes do not describe a record.
pub fn decode(bytes: &[u8]) -> Result<SaveRecord, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Decode a record, treating empty or corrupt payloads as absent.
#[must_use]
pub fn decode_lenient(bytes: &[u8]) -> Option<SaveRecord> {
    match decode(bytes) {
        Ok(record) => Some(record),
        Err(CodecError::Empty) => None,
        Err(err) => {
            log::warn!("discarding undecodable save payload ({} bytes): {err}", bytes.len());
            None
        }
    }
}

/// Lowercase hex SHA-256 of a payload.
#[must_use]
pub fn payload_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CharacterInfo, ScoreInfo, StageInfo};

    fn sample() -> SaveRecord {
        SaveRecord {
            schema_version: 1,
            score_info: ScoreInfo { high_score: 4_800 },
            stage_info: StageInfo { current_stage: 12 },
            character_info: CharacterInfo {
                level: 9,
                current_xp: 77,
                xp_to_next_level: 410,
                attack_power: 64,
                speed: 1.75,
                attack_delay: 0.3,
            },
            gold: 2_250,
            saved_at_ticks: 638_500_000_000_000_123,
        }
    }

    #[test]
    fn encode_then_decode_preserves_record() {
        let record = sample();
        let bytes = encode(&record).unwrap();
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn empty_payload_is_distinguished_from_corrupt() {
        assert!(matches!(decode(&[]), Err(CodecError::Empty)));
        assert!(matches!(decode(b"{not json"), Err(CodecError::Json(_))));
        assert!(decode_lenient(&[]).is_none());
        assert!(decode_lenient(b"\xff\xfe").is_none());
    }

    #[test]
    fn digest_is_stable_hex() {
        let digest = payload_digest(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(payload_digest(&encode(&sample()).unwrap()).len(), 64);
    }
}
