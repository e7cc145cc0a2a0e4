use crate::error::{AttendanceError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Dimensionality of the face embeddings the engine works with.
pub const EMBEDDING_DIM: usize = 128;

/// Fixed-length numeric vector representing a face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != EMBEDDING_DIM {
            return Err(AttendanceError::EncodingFailed(format!(
                "expected {} dimensions, got {}",
                EMBEDDING_DIM,
                values.len()
            )));
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Serialize an embedding to the storage-safe binary form.
pub fn encode(embedding: &Embedding) -> Vec<u8> {
    bincode::serialize(&embedding.0).expect("Vec<f32> serialization is infallible")
}

/// Decode a stored payload back into an embedding. Failure here means the
/// stored data is corrupt and needs operator attention, not a user retry.
pub fn decode(bytes: &[u8]) -> Result<Embedding> {
    let values: Vec<f32> = bincode::deserialize(bytes)
        .map_err(|e| AttendanceError::EmbeddingDecode(e.to_string()))?;

    if values.len() != EMBEDDING_DIM {
        return Err(AttendanceError::EmbeddingDecode(format!(
            "expected {} dimensions, got {}",
            EMBEDDING_DIM,
            values.len()
        )));
    }

    Ok(Embedding(values))
}

/// Euclidean distance between two stored embeddings (lower = more similar).
pub fn distance(a: &[u8], b: &[u8]) -> Result<f32> {
    let ea = decode(a)?;
    let eb = decode(b)?;
    Ok(euclidean(&ea, &eb))
}

pub fn euclidean(a: &Embedding, b: &Embedding) -> f32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// SHA-256 hex digest of a raw photo, used for cheap duplicate detection
/// before any embedding comparison.
pub fn photo_hash(image_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding_with(first: f32) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = first;
        v[5] = 0.25;
        Embedding::new(v).unwrap()
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let original = embedding_with(0.1234567);
        let bytes = encode(&original);
        assert!(!bytes.is_empty());
        let decoded = decode(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = encode(&embedding_with(0.3));
        let b = encode(&embedding_with(0.9));
        assert_eq!(distance(&a, &b).unwrap(), distance(&b, &a).unwrap());
    }

    #[test]
    fn distance_of_identical_embeddings_is_zero() {
        let a = encode(&embedding_with(0.5));
        assert_eq!(distance(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            decode(&[1, 2, 3]),
            Err(AttendanceError::EmbeddingDecode(_))
        ));
    }

    #[test]
    fn wrong_dimensionality_fails_to_decode() {
        let short = bincode::serialize(&vec![0.0f32; 64]).unwrap();
        assert!(matches!(
            decode(&short),
            Err(AttendanceError::EmbeddingDecode(_))
        ));
    }

    #[test]
    fn wrong_dimensionality_rejected_at_construction() {
        assert!(Embedding::new(vec![0.0; 64]).is_err());
    }

    #[test]
    fn photo_hash_is_stable_hex() {
        let h = photo_hash(b"some photo bytes");
        assert_eq!(h.len(), 64);
        assert_eq!(h, photo_hash(b"some photo bytes"));
        assert_ne!(h, photo_hash(b"other photo bytes"));
    }
}
