//! Deterministic benchmark harness for a tiled bf16 matmul accelerator
//!
//! A 240-byte seed is expanded with BLAKE3 into a 16x50240 `u8` matrix A and
//! a 50240x16 `i8` matrix B. The host computes the exact `i32` product as
//! ground truth, then pads and tiles the operands and streams them through a
//! reader / compute / writer pipeline on the accelerator while timing it.
//!
//! # Example
//!
//! ```rust
//! use tt_matmul_bench::{reference, seed, solution, BenchConfig, Seed};
//!
//! let config = BenchConfig::benchmark();
//! let operands = seed::expand(&[0u8; 240], &config).unwrap();
//! let c = reference::compute(&operands, &config);
//! let seed = Seed::new(vec![0u8; 240], &config).unwrap();
//! assert_eq!(solution::serialize(&seed, &c).len(), 1264);
//! ```

pub mod error;
pub mod hardware;
pub mod seed;
pub mod input;
pub mod reference;
pub mod solution;
pub mod tiling;
pub mod program;
pub mod device;
pub mod pipeline;
pub mod bench;

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

pub use bench::{benchmark, BenchOptions, BenchStats, BenchTarget};
pub use error::{BenchError, BenchResult, ErrorCategory};
pub use hardware::{BenchConfig, KernelRole, KernelSet};
pub use input::{BenchInput, PayloadKind, PayloadSource};
pub use pipeline::{build_and_run, PipelineSession, SessionState};
pub use seed::{Operands, Seed};
pub use tiling::{pad_and_tile, TiledOperands, TiledShape};

/// Everything one invocation of the harness needs
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source: PayloadSource,
    pub write_sol: Option<PathBuf>,
    pub kernel_dir: PathBuf,
    pub device_id: usize,
    pub bench: BenchOptions,
    /// Run the accelerator benchmark at all
    pub run_device: bool,
    /// Read the device result back and compare it with the reference
    pub verify: bool,
}

impl RunOptions {
    pub fn validate(&self) -> BenchResult<()> {
        if let PayloadSource::Hex(text) = &self.source {
            if text.is_empty() {
                return Err(BenchError::config("--seed-hex must not be empty"));
            }
        }
        self.bench.validate()
    }
}

/// Result of cross-checking the device output against the reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verification {
    pub max_abs_error: f64,
    pub max_rel_error: f64,
}

/// Device half of a [`RunReport`]
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub shape: TiledShape,
    pub stats: BenchStats,
    pub include_io: bool,
    pub verification: Option<Verification>,
}

/// What a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub seed_bytes: usize,
    pub a_bytes: usize,
    pub b_bytes: usize,
    pub cpu_ms: f64,
    pub solution: Option<PathBuf>,
    pub solution_bytes: Option<usize>,
    pub device: Option<DeviceReport>,
}

/// Compare a device result with the exact reference within bf16 tolerance
pub fn verify_output(device: &[f32], reference: &[i32]) -> BenchResult<Verification> {
    if device.len() != reference.len() {
        return Err(BenchError::verification(format!(
            "device produced {} values, reference has {}",
            device.len(),
            reference.len()
        )));
    }

    let mut worst = Verification { max_abs_error: 0.0, max_rel_error: 0.0 };
    for (i, (&got, &want)) in device.iter().zip(reference).enumerate() {
        let want = f64::from(want);
        let abs = (f64::from(got) - want).abs();
        let tolerance = (want.abs() / 128.0).max(1.0);
        if abs > tolerance {
            return Err(BenchError::verification(format!(
                "element {} is {} on the device, {} on the host",
                i, got, want
            )));
        }
        worst.max_abs_error = worst.max_abs_error.max(abs);
        worst.max_rel_error = worst.max_rel_error.max(abs / want.abs().max(1.0));
    }
    Ok(worst)
}

/// Load the input, compute the reference, write the solution and benchmark
pub fn run(options: &RunOptions, config: &BenchConfig) -> BenchResult<RunReport> {
    options.validate()?;
    config.validate()?;

    let input = input::load_source(&options.source, config)?;
    let kernels = if options.run_device { Some(KernelSet::locate(&options.kernel_dir)?) } else { None };
    info!(
        seed_bytes = input.seed.len(),
        a_bytes = input.operands.a.len(),
        b_bytes = input.operands.b.len(),
        "input loaded"
    );

    let cpu_start = Instant::now();
    let c = reference::compute(&input.operands, config);
    let cpu_ms = cpu_start.elapsed().as_secs_f64() * 1000.0;
    info!(cpu_ms, "reference matmul done");

    let solution_bytes = match &options.write_sol {
        Some(path) => {
            let written = solution::write_solution(path, &input.seed, &c)?;
            info!(path = %path.display(), bytes = written, "solution written");
            Some(written)
        }
        None => None,
    };

    let device = match kernels {
        Some(kernels) => Some(run_device(&input.operands, &c, &kernels, options, config)?),
        None => None,
    };

    Ok(RunReport {
        seed_bytes: input.seed.len(),
        a_bytes: input.operands.a.len(),
        b_bytes: input.operands.b.len(),
        cpu_ms,
        solution: options.write_sol.clone(),
        solution_bytes,
        device,
    })
}

fn run_device(
    operands: &Operands,
    reference: &[i32],
    kernels: &KernelSet,
    options: &RunOptions,
    config: &BenchConfig,
) -> BenchResult<DeviceReport> {
    info!("preparing bf16 operands padded to {0}x{0} tiles", config.tile_size);
    let tiled = pad_and_tile(operands, config);

    let mut session = PipelineSession::new(*config);
    session.configure(kernels, options.device_id)?;
    session.stage(&tiled)?;

    let bench_options = BenchOptions {
        read_output: options.bench.read_output || options.verify,
        ..options.bench
    };
    let outcome = match benchmark(&mut session, &bench_options) {
        Ok(outcome) => outcome,
        Err(e) => {
            // the benchmark error wins, but a failed teardown is still reported
            if let Err(close) = session.close() {
                tracing::error!("{}", close);
            }
            return Err(e);
        }
    };

    let verification = match (&outcome.output, options.verify) {
        (Some(output), true) => Some(verify_output(&tiling::extract_result(output, config), reference)),
        _ => None,
    };
    session.close()?;
    let verification = verification.transpose()?;

    Ok(DeviceReport {
        shape: *session.shape(),
        stats: outcome.stats,
        include_io: options.bench.include_io,
        verification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::write_kernel_dir;

    fn options(source: PayloadSource, kernel_dir: PathBuf) -> RunOptions {
        RunOptions {
            source,
            write_sol: None,
            kernel_dir,
            device_id: 0,
            bench: BenchOptions { warmup: 1, iters: 2, include_io: false, read_output: false },
            run_device: true,
            verify: true,
        }
    }

    #[test]
    fn test_verify_output_tolerance() {
        assert!(verify_output(&[1000.0, -3.0], &[1004, -3]).is_ok());
        assert!(verify_output(&[1000.0], &[1010]).is_err());
        assert!(verify_output(&[0.0], &[1, 2]).is_err());
    }

    #[test]
    fn test_run_small_shape_end_to_end() {
        let config = BenchConfig::with_shape(16, 16, 64).unwrap();
        let dir = write_kernel_dir();
        let sol = dir.path().join("sol.bin");
        let mut opts = options(PayloadSource::Hex("00".repeat(240)), dir.path().to_path_buf());
        opts.write_sol = Some(sol.clone());

        let report = run(&opts, &config).unwrap();
        assert_eq!(report.seed_bytes, 240);
        assert_eq!(report.solution_bytes, Some(240 + 16 * 16 * 4));
        let device = report.device.unwrap();
        assert_eq!(device.stats.iterations, 2);
        assert!(device.verification.is_some());
        assert_eq!(std::fs::read(&sol).unwrap().len(), 1264);
    }

    #[test]
    fn test_missing_kernels_fail_before_reference_work() {
        let config = BenchConfig::with_shape(16, 16, 64).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let sol = dir.path().join("sol.bin");
        let mut opts = options(PayloadSource::Hex("00".repeat(240)), dir.path().join("kernels"));
        opts.write_sol = Some(sol.clone());

        assert!(matches!(run(&opts, &config), Err(BenchError::KernelsMissing { .. })));
        assert!(!sol.exists());
    }

    #[test]
    fn test_bad_payload_is_input_error() {
        let config = BenchConfig::benchmark();
        let opts = options(PayloadSource::Hex("00".repeat(239)), PathBuf::from("unused"));
        let err = run(&opts, &config).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InputFormat);
    }

    #[test]
    fn test_zero_iterations_is_config_error() {
        let config = BenchConfig::benchmark();
        let mut opts = options(PayloadSource::Hex("00".repeat(240)), PathBuf::from("unused"));
        opts.bench.iters = 0;
        assert_eq!(run(&opts, &config).unwrap_err().category(), ErrorCategory::Configuration);
    }
}
