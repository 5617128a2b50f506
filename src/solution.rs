//! Solution artifact: the seed followed by the reference result
//!
//! Layout: seed bytes verbatim, then every element of C in row-major order
//! as a 4-byte little-endian two's-complement integer.

use std::fs;
use std::path::Path;

use crate::error::{BenchError, BenchResult};
use crate::hardware::BenchConfig;
use crate::seed::Seed;

/// Encode a seed and its reference result
pub fn serialize(seed: &Seed, result: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(seed.len() + result.len() * 4);
    out.extend_from_slice(seed.as_bytes());
    for value in result {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode a solution produced by [`serialize`]
pub fn deserialize(bytes: &[u8], config: &BenchConfig) -> BenchResult<(Seed, Vec<i32>)> {
    if bytes.len() != config.solution_len() {
        return Err(BenchError::PayloadSize { got: bytes.len(), accepted: vec![config.solution_len()] });
    }
    let (seed_bytes, body) = bytes.split_at(config.seed_size);
    let seed = Seed::new(seed_bytes.to_vec(), config)?;
    let result = body
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok((seed, result))
}

/// Serialize and write the solution file, replacing any existing one
pub fn write_solution(path: impl AsRef<Path>, seed: &Seed, result: &[i32]) -> BenchResult<usize> {
    let path = path.as_ref();
    let bytes = serialize(seed, result);
    fs::write(path, &bytes).map_err(|e| BenchError::io(path, e))?;
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ZERO_SEED_RESULT;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_layout() {
        let config = BenchConfig::benchmark();
        let seed = Seed::new((0..240).map(|i| i as u8).collect(), &config).unwrap();
        let mut result = vec![0i32; 256];
        result[0] = 1;
        result[1] = -1;
        result[255] = 0x0102_0304;

        let bytes = serialize(&seed, &result);
        assert_eq!(bytes.len(), 1264);
        assert_eq!(&bytes[..240], seed.as_bytes());
        assert_eq!(&bytes[240..248], &[1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&bytes[1260..], &[4, 3, 2, 1]);
    }

    #[test]
    fn test_zero_seed_solution_digest() {
        let config = BenchConfig::benchmark();
        let seed = Seed::new(vec![0u8; 240], &config).unwrap();
        let result: Vec<i32> = ZERO_SEED_RESULT.iter().flatten().copied().collect();
        let bytes = serialize(&seed, &result);
        assert_eq!(
            blake3::hash(&bytes).to_hex().as_str(),
            "b98d2d8c79fcdb79e272d35b226e00235ec5fc17e00fb6e8bc59faa60c2e9783"
        );
    }

    #[test]
    fn test_deserialize_rejects_wrong_length() {
        let config = BenchConfig::benchmark();
        assert!(matches!(deserialize(&[0u8; 1263], &config), Err(BenchError::PayloadSize { .. })));
    }

    #[test]
    fn test_write_solution() {
        let config = BenchConfig::benchmark();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sol.bin");
        let seed = Seed::new(vec![7u8; 240], &config).unwrap();

        let written = write_solution(&path, &seed, &[5i32; 256]).unwrap();
        assert_eq!(written, 1264);
        let (read_seed, result) = deserialize(&fs::read(&path).unwrap(), &config).unwrap();
        assert_eq!(read_seed, seed);
        assert_eq!(result, vec![5i32; 256]);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            seed in proptest::collection::vec(any::<u8>(), 240),
            result in proptest::collection::vec(any::<i32>(), 256),
        ) {
            let config = BenchConfig::benchmark();
            let seed = Seed::new(seed, &config).unwrap();
            let (back_seed, back_result) = deserialize(&serialize(&seed, &result), &config).unwrap();
            prop_assert_eq!(back_seed, seed);
            prop_assert_eq!(back_result, result);
        }
    }
}
