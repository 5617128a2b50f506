//! Input payload loading
//!
//! A payload is either a bare seed, or a seed followed by precomputed A and
//! B, optionally followed by the reserved tail. The size is classified
//! before anything is derived from it.

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{BenchError, BenchResult};
use crate::hardware::BenchConfig;
use crate::seed::{expand, Operands, Seed};

/// Where the payload comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    File(PathBuf),
    Hex(String),
}

/// Interpretation of a payload, decided by its length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Seed only; operands are expanded from it
    Seed,
    /// Seed + A + B
    SeedWithOperands,
    /// Seed + A + B + reserved tail
    SeedWithOperandsAndTail,
}

/// A seed together with the operands it stands for
#[derive(Debug, Clone)]
pub struct BenchInput {
    pub seed: Seed,
    pub operands: Operands,
    pub kind: PayloadKind,
}

/// Read raw payload bytes from a file or a hex string
pub fn read_payload(source: &PayloadSource) -> BenchResult<Vec<u8>> {
    match source {
        PayloadSource::File(path) => fs::read(path).map_err(|e| BenchError::io(path, e)),
        PayloadSource::Hex(text) => parse_hex(text),
    }
}

/// Decode a hex string, with an optional `0x` prefix
pub fn parse_hex(text: &str) -> BenchResult<Vec<u8>> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text)
        .as_bytes();

    if digits.len() % 2 != 0 {
        return Err(BenchError::hex("hex string must have even length"));
    }

    digits
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| match (hex_value(pair[0]), hex_value(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(BenchError::hex(format!("invalid hex character near offset {}", 2 * i))),
        })
        .collect()
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(10 + c - b'a'),
        b'A'..=b'F' => Some(10 + c - b'A'),
        _ => None,
    }
}

/// Decide how a payload of `len` bytes is interpreted
pub fn classify(len: usize, config: &BenchConfig) -> BenchResult<PayloadKind> {
    let [seed, with_operands, with_tail] = config.accepted_payload_sizes();
    match len {
        l if l == seed => Ok(PayloadKind::Seed),
        l if l == with_operands => Ok(PayloadKind::SeedWithOperands),
        l if l == with_tail => Ok(PayloadKind::SeedWithOperandsAndTail),
        got => Err(BenchError::PayloadSize { got, accepted: config.accepted_payload_sizes().to_vec() }),
    }
}

/// Validate a payload and produce the seed and operands it describes
pub fn load(payload: &[u8], config: &BenchConfig) -> BenchResult<BenchInput> {
    let kind = classify(payload.len(), config)?;
    let (seed_bytes, rest) = payload.split_at(config.seed_size);
    let seed = Seed::new(seed_bytes.to_vec(), config)?;

    let operands = match kind {
        PayloadKind::Seed => expand(seed.as_bytes(), config)?,
        PayloadKind::SeedWithOperands | PayloadKind::SeedWithOperandsAndTail => {
            Operands::from_stream(rest, config)
        }
    };
    debug!(?kind, bytes = payload.len(), "payload loaded");

    Ok(BenchInput { seed, operands, kind })
}

/// Read and load a payload in one step
pub fn load_source(source: &PayloadSource, config: &BenchConfig) -> BenchResult<BenchInput> {
    let payload = read_payload(source)?;
    load(&payload, config)
}
