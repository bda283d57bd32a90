//! Fingerprint wire codec.
//!
//! A fingerprint travels as two parts: the raw little-endian f32 bytes of
//! the embedding vector, and a shape string of comma-joined dimension
//! sizes ("768" for a 1-D vector). The pair survives storage and decodes
//! back to the exact same vector, bit for bit.

/// Errors raised while decoding a stored fingerprint.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("Malformed fingerprint shape: {0:?}")]
    InvalidShape(String),

    #[error("Fingerprint length mismatch: shape implies {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

/// Serialize a vector into (bytes, shape).
pub fn encode(vector: &[f32]) -> (Vec<u8>, String) {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    (bytes, vector.len().to_string())
}

/// Deserialize fingerprint bytes against their shape string.
///
/// Multi-dimensional shapes ("12,768") are accepted; the element count is
/// the product of the dimensions and the result is the flat vector.
pub fn decode(bytes: &[u8], shape: &str) -> Result<Vec<f32>, FingerprintError> {
    let mut elements: usize = 1;
    for dim in shape.split(',') {
        let size: usize = dim
            .trim()
            .parse()
            .map_err(|_| FingerprintError::InvalidShape(shape.to_string()))?;
        elements = elements
            .checked_mul(size)
            .ok_or_else(|| FingerprintError::InvalidShape(shape.to_string()))?;
    }

    let expected = elements * 4;
    if bytes.len() != expected {
        return Err(FingerprintError::LengthMismatch {
            expected,
            got: bytes.len(),
        });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_bit_exact() {
        let vector = vec![0.1f32, -2.5, 3.25, 0.0, -0.0, 1e-38, f32::MAX, f32::MIN];
        let (bytes, shape) = encode(&vector);
        assert_eq!(shape, "8");
        assert_eq!(bytes.len(), 32);

        let decoded = decode(&bytes, &shape).unwrap();
        assert_eq!(decoded.len(), vector.len());
        for (orig, back) in vector.iter().zip(decoded.iter()) {
            assert_eq!(orig.to_bits(), back.to_bits());
        }
    }

    #[test]
    fn test_empty_vector() {
        let (bytes, shape) = encode(&[]);
        assert!(bytes.is_empty());
        assert_eq!(shape, "0");
        assert!(decode(&bytes, &shape).unwrap().is_empty());
    }

    #[test]
    fn test_multi_dimension_shape() {
        let vector: Vec<f32> = (0..6).map(|i| i as f32).collect();
        let (bytes, _) = encode(&vector);
        let decoded = decode(&bytes, "2,3").unwrap();
        assert_eq!(decoded, vector);
    }

    #[test]
    fn test_length_mismatch() {
        let (bytes, _) = encode(&[1.0, 2.0, 3.0]);
        let err = decode(&bytes, "4").unwrap_err();
        match err {
            FingerprintError::LengthMismatch { expected, got } => {
                assert_eq!(expected, 16);
                assert_eq!(got, 12);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_shape_strings() {
        let (bytes, _) = encode(&[1.0]);
        assert!(matches!(
            decode(&bytes, "abc"),
            Err(FingerprintError::InvalidShape(_))
        ));
        assert!(matches!(
            decode(&bytes, ""),
            Err(FingerprintError::InvalidShape(_))
        ));
        assert!(matches!(
            decode(&bytes, "1,"),
            Err(FingerprintError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let (mut bytes, shape) = encode(&[1.0, 2.0]);
        bytes.pop();
        assert!(matches!(
            decode(&bytes, &shape),
            Err(FingerprintError::LengthMismatch { .. })
        ));
    }
}
