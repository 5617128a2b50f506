//! Deterministic seed expansion
//!
//! The seed is fed to BLAKE3 and the extendable output is read as one
//! continuous stream: A (row-major, unsigned), then B (row-major, two's
//! complement), then a reserved tail that nothing consumes but which keeps
//! the extended payload format the same length as the stream.

use crate::error::{BenchError, BenchResult};
use crate::hardware::BenchConfig;

/// The benchmark seed, the sole source of entropy for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed(Vec<u8>);

impl Seed {
    pub fn new(bytes: Vec<u8>, config: &BenchConfig) -> BenchResult<Self> {
        if bytes.len() != config.seed_size {
            return Err(BenchError::InvalidSeedLength {
                expected: config.seed_size,
                got: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Operand matrices of one benchmark instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operands {
    /// `rows x k`, row-major
    pub a: Vec<u8>,
    /// `k x cols`, row-major
    pub b: Vec<i8>,
}

impl Operands {
    /// Split a byte stream laid out as A followed by B
    pub fn from_stream(stream: &[u8], config: &BenchConfig) -> Self {
        let a_len = config.a_len();
        let b_len = config.b_len();
        let a = stream[..a_len].to_vec();
        let b = stream[a_len..a_len + b_len].iter().map(|&byte| byte as i8).collect();
        Self { a, b }
    }
}

/// Expand a seed into operands A and B
pub fn expand(seed: &[u8], config: &BenchConfig) -> BenchResult<Operands> {
    if seed.len() != config.seed_size {
        return Err(BenchError::InvalidSeedLength { expected: config.seed_size, got: seed.len() });
    }

    let mut stream = vec![0u8; config.expansion_len()];
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed);
    hasher.finalize_xof().fill(&mut stream);

    Ok(Operands::from_stream(&stream, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_zero_seed_golden_prefix() {
        let config = BenchConfig::benchmark();
        let ops = expand(&[0u8; 240], &config).unwrap();

        assert_eq!(ops.a.len(), 16 * 50240);
        assert_eq!(ops.b.len(), 50240 * 16);
        assert_eq!(
            &ops.a[..16],
            &[0x78, 0x76, 0xd9, 0xaa, 0xc1, 0x1b, 0x11, 0x97, 0x47, 0x41, 0x67, 0xb7, 0x48, 0x56, 0x26, 0xbf]
        );
        assert_eq!(&ops.b[..8], &[-51, 78, 11, 30, 114, -3, 38, -114]);
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let config = BenchConfig::benchmark();
        let seed: Vec<u8> = (0..240u32).map(|i| (i * 7 + 3) as u8).collect();
        let first = expand(&seed, &config).unwrap();
        let second = expand(&seed, &config).unwrap();
        assert!(first == second);
    }

    #[test]
    fn test_different_seeds_differ() {
        let config = BenchConfig::benchmark();
        let mut seed = [0u8; 240];
        let zero = expand(&seed, &config).unwrap();
        seed[239] = 1;
        let one = expand(&seed, &config).unwrap();
        assert_ne!(zero.a[..64], one.a[..64]);
    }

    #[test]
    fn test_rejects_wrong_seed_length() {
        let config = BenchConfig::benchmark();
        for len in [0, 239, 241] {
            match expand(&vec![0u8; len], &config) {
                Err(BenchError::InvalidSeedLength { expected: 240, got }) => assert_eq!(got, len),
                other => panic!("Expected InvalidSeedLength, got {:?}", other.map(|_| ())),
            }
        }
        assert!(Seed::new(vec![0u8; 10], &config).is_err());
    }

    #[test]
    fn test_small_shape_uses_stream_prefix() {
        // The stream for a smaller shape is a prefix of the same XOF output.
        let small = BenchConfig::with_shape(2, 2, 32).unwrap();
        let ops = expand(&[0u8; 240], &small).unwrap();
        assert_eq!(&ops.a[..4], &[0x78, 0x76, 0xd9, 0xaa]);
        assert_eq!(ops.b.len(), 64);
    }
}
