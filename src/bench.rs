//! Benchmark driver
//!
//! Warmup cycles run the full enqueue-and-synchronize loop and are
//! discarded. Timed cycles each enqueue one run and then either wait for
//! device completion or, with `include_io`, perform a blocking readback
//! inside the timed interval.

use std::time::{Duration, Instant};

use half::bf16;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BenchError, BenchResult};
use crate::pipeline::PipelineSession;

/// Anything the driver can time
pub trait BenchTarget {
    /// Submit one run without waiting
    fn enqueue(&mut self) -> BenchResult<()>;
    /// Wait for every submitted run
    fn synchronize(&mut self) -> BenchResult<()>;
    /// Blocking readback of the latest result
    fn read_output(&mut self) -> BenchResult<Vec<bf16>>;
    /// Operations performed by one run
    fn ops_per_run(&self) -> f64;
}

impl BenchTarget for PipelineSession {
    fn enqueue(&mut self) -> BenchResult<()> {
        PipelineSession::enqueue(self)
    }

    fn synchronize(&mut self) -> BenchResult<()> {
        PipelineSession::synchronize(self)
    }

    fn read_output(&mut self) -> BenchResult<Vec<bf16>> {
        PipelineSession::read_output(self)
    }

    fn ops_per_run(&self) -> f64 {
        let shape = self.shape();
        2.0 * shape.m_pad as f64 * shape.n_pad as f64 * shape.k as f64
    }
}

/// Benchmark protocol parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchOptions {
    pub warmup: usize,
    pub iters: usize,
    /// Time the blocking readback as part of each cycle
    pub include_io: bool,
    /// Read the result once after the timed cycles
    pub read_output: bool,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self { warmup: 2, iters: 10, include_io: false, read_output: false }
    }
}

impl BenchOptions {
    pub fn validate(&self) -> BenchResult<()> {
        if self.iters == 0 {
            return Err(BenchError::config("--iters must be > 0"));
        }
        Ok(())
    }
}

/// Latency statistics and derived throughput
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchStats {
    pub iterations: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub ops_per_sec: f64,
    pub gops: f64,
}

impl BenchStats {
    pub fn from_samples(samples: &[Duration], ops_per_run: f64) -> BenchResult<Self> {
        if samples.is_empty() {
            return Err(BenchError::config("no benchmark samples"));
        }
        let ms: Vec<f64> = samples.iter().map(|d| d.as_nanos() as f64 / 1e6).collect();
        let avg_ms = ms.iter().sum::<f64>() / ms.len() as f64;
        let min_ms = ms.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = ms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let ops_per_sec = ops_per_run / (avg_ms / 1000.0);

        Ok(Self {
            iterations: ms.len(),
            avg_ms,
            min_ms,
            max_ms,
            ops_per_sec,
            gops: ops_per_sec / 1e9,
        })
    }
}

/// Statistics plus the result, if it was read back
#[derive(Debug, Clone)]
pub struct BenchOutcome {
    pub stats: BenchStats,
    pub output: Option<Vec<bf16>>,
}

/// Run the warmup and timed cycles against `target`
pub fn benchmark<T: BenchTarget>(target: &mut T, options: &BenchOptions) -> BenchResult<BenchOutcome> {
    options.validate()?;

    for i in 0..options.warmup {
        target.enqueue()?;
        target.synchronize()?;
        debug!(cycle = i, "warmup");
    }

    let mut samples = Vec::with_capacity(options.iters);
    let mut output = None;
    for i in 0..options.iters {
        let start = Instant::now();
        target.enqueue()?;
        if options.include_io {
            output = Some(target.read_output()?);
        } else {
            target.synchronize()?;
        }
        let elapsed = start.elapsed();
        debug!(cycle = i, elapsed_us = elapsed.as_micros() as u64, "timed");
        samples.push(elapsed);
    }

    if options.read_output && !options.include_io {
        output = Some(target.read_output()?);
    }

    Ok(BenchOutcome {
        stats: BenchStats::from_samples(&samples, target.ops_per_run())?,
        output,
    })
}
