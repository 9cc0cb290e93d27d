//! Versioned on-disk encoding for embedding vectors
//!
//! Layout (little endian): `[version: u8][dimension: u32][dimension × f32]`.
//! The bytes are persisted as lowercase hex next to a SHA-256 checksum of the
//! raw bytes, so a torn or edited record is detected on load.

use facededup_common::{FaceDedupError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::EmbeddingVector;

/// Current encoding version
pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = 1 + 4;
const FLOAT_WIDTH: usize = std::mem::size_of::<f32>();

/// Hex payload plus checksum, as written to storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedVector {
    pub payload: String,
    pub checksum: String,
}

/// Encode a vector into the persisted form
pub fn encode(vector: &EmbeddingVector) -> EncodedVector {
    let values = vector.as_slice();
    let mut bytes = Vec::with_capacity(HEADER_LEN + values.len() * FLOAT_WIDTH);

    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    EncodedVector {
        checksum: checksum(&bytes),
        payload: hex::encode(bytes),
    }
}

/// Decode and verify a persisted vector
pub fn decode(encoded: &EncodedVector) -> Result<EmbeddingVector> {
    let bytes = hex::decode(&encoded.payload)
        .map_err(|e| FaceDedupError::codec(format!("Invalid hex payload: {}", e)))?;

    let actual = checksum(&bytes);
    if !actual.eq_ignore_ascii_case(&encoded.checksum) {
        return Err(FaceDedupError::codec(format!(
            "Checksum mismatch: stored {}, computed {}",
            encoded.checksum, actual
        )));
    }

    if bytes.len() < HEADER_LEN {
        return Err(FaceDedupError::codec(format!(
            "Payload too short: {} bytes",
            bytes.len()
        )));
    }

    let version = bytes[0];
    if version != FORMAT_VERSION {
        return Err(FaceDedupError::codec(format!(
            "Unsupported vector format version {}",
            version
        )));
    }

    let dimension = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let body = &bytes[HEADER_LEN..];
    if body.len() != dimension * FLOAT_WIDTH {
        return Err(FaceDedupError::codec(format!(
            "Header declares {} values but payload holds {} bytes",
            dimension,
            body.len()
        )));
    }

    let values = body
        .chunks_exact(FLOAT_WIDTH)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok(EmbeddingVector::new(values))
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EmbeddingVector {
        EmbeddingVector::new(vec![0.25, -1.5, 3.0e-7, f32::MAX])
    }

    #[test]
    fn test_encode_layout() {
        let encoded = encode(&sample());
        let bytes = hex::decode(&encoded.payload).unwrap();

        assert_eq!(bytes[0], FORMAT_VERSION);
        assert_eq!(&bytes[1..5], &4u32.to_le_bytes());
        assert_eq!(bytes.len(), 5 + 4 * 4);
        assert_eq!(encoded.checksum.len(), 64);
    }

    #[test]
    fn test_decode_is_bit_exact() {
        let original = sample();
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let mut encoded = encode(&sample());
        // flip one hex digit in the last float
        let last = encoded.payload.pop().unwrap();
        encoded.payload.push(if last == '0' { '1' } else { '0' });

        let err = decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = hex::decode(encode(&sample()).payload).unwrap();
        bytes[0] = 9;
        let encoded = EncodedVector {
            checksum: checksum(&bytes),
            payload: hex::encode(&bytes),
        };

        let err = decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut bytes = hex::decode(encode(&sample()).payload).unwrap();
        bytes.truncate(bytes.len() - 2);
        let encoded = EncodedVector {
            checksum: checksum(&bytes),
            payload: hex::encode(&bytes),
        };

        assert!(matches!(decode(&encoded), Err(FaceDedupError::Codec(_))));
    }

    #[test]
    fn test_bad_hex_rejected() {
        let encoded = EncodedVector {
            payload: "zz".to_string(),
            checksum: String::new(),
        };
        assert!(matches!(decode(&encoded), Err(FaceDedupError::Codec(_))));
    }
}
