//! Tiled matmul accelerator benchmark CLI
//!
//! Usage:
//!   tt-matmul-bench --seed-hex 0000...00 --write-sol sol.bin --no-gpu
//!   tt-matmul-bench --seed-file seed.bin --iters 20 --warmup 3 --include-io
//!   tt-matmul-bench --seed-file payload.bin --verify --json

use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use tt_matmul_bench::{run, BenchConfig, BenchOptions, PayloadSource, RunOptions, RunReport};

#[derive(Parser, Debug)]
#[command(name = "tt-matmul-bench")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Deterministic bf16 tiled matmul benchmark with a verifiable solution artifact")]
#[command(group(ArgGroup::new("seed").required(true).args(["seed_file", "seed_hex"])))]
struct Args {
    /// 240-byte seed, or seed + matrix A/B payload
    #[arg(long = "seed-file", value_name = "PATH")]
    seed_file: Option<PathBuf>,

    /// 240-byte seed as a hex string
    #[arg(long = "seed-hex", value_name = "HEX")]
    seed_hex: Option<String>,

    /// Write the solution (seed + C) to this file
    #[arg(long = "write-sol", value_name = "PATH")]
    write_sol: Option<PathBuf>,

    /// Kernel source directory
    #[arg(long = "kernel-dir", env = "TT_MATMUL_KERNEL_DIR", default_value = "kernels")]
    kernel_dir: PathBuf,

    /// Device id
    #[arg(long = "device-id", default_value = "0")]
    device_id: usize,

    /// Benchmark iterations
    #[arg(long = "iters", default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    iters: u32,

    /// Warmup iterations
    #[arg(long = "warmup", default_value = "2")]
    warmup: u32,

    /// Include output readback in timing
    #[arg(long = "include-io")]
    include_io: bool,

    /// Read output once after benchmarking
    #[arg(long = "read-output")]
    read_output: bool,

    /// Skip the accelerator benchmark
    #[arg(long = "no-gpu")]
    no_gpu: bool,

    /// Read the device result back and check it against the reference
    #[arg(long = "verify")]
    verify: bool,

    /// Output the run report as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

impl Args {
    fn run_options(&self) -> RunOptions {
        let source = match (&self.seed_file, &self.seed_hex) {
            (Some(path), _) => PayloadSource::File(path.clone()),
            (None, Some(hex)) => PayloadSource::Hex(hex.clone()),
            (None, None) => unreachable!("clap requires one seed source"),
        };
        RunOptions {
            source,
            write_sol: self.write_sol.clone(),
            kernel_dir: self.kernel_dir.clone(),
            device_id: self.device_id,
            bench: BenchOptions {
                warmup: self.warmup as usize,
                iters: self.iters as usize,
                include_io: self.include_io,
                read_output: self.read_output,
            },
            run_device: !self.no_gpu,
            verify: self.verify,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = BenchConfig::benchmark();
    let report = match run(&args.run_options(), &config) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };

    if args.json_output {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: Failed to serialize to JSON: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
    } else {
        print_report(&report);
    }
}

fn print_report(report: &RunReport) {
    println!("{}: {} bytes", "Seed size".cyan(), report.seed_bytes);
    println!("{}: {}, {}: {}", "A bytes".cyan(), report.a_bytes, "B bytes".cyan(), report.b_bytes);
    println!("{}: {:.3} ms", "CPU matmul time".cyan(), report.cpu_ms);

    if let (Some(path), Some(bytes)) = (&report.solution, report.solution_bytes) {
        println!("{} {} ({} bytes)", "Wrote sol to:".green(), path.display(), bytes);
    }

    let Some(device) = &report.device else {
        return;
    };

    println!();
    println!(
        "{} ({}x{}x{})",
        "Device matmul".bold().green(),
        device.shape.m_pad,
        device.shape.n_pad,
        device.shape.k
    );
    println!("  {}: {:.4}", "avg_ms".cyan(), device.stats.avg_ms);
    println!("  {}: {:.4}", "min_ms".cyan(), device.stats.min_ms);
    println!("  {}: {:.4}", "max_ms".cyan(), device.stats.max_ms);
    println!("  {}:   {:.3}", "gops".cyan(), device.stats.gops);

    if let Some(check) = &device.verification {
        println!(
            "  {}: max abs error {:.1}, max rel error {:.2e}",
            "verified".green(),
            check.max_abs_error,
            check.max_rel_error
        );
    }
    if !device.include_io {
        println!("{}", "Timing excludes output readback (--include-io to include).".dimmed());
    }
}
