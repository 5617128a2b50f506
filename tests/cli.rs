//! End-to-end tests of the benchmark binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

const ZERO_SEED_SOLUTION_BLAKE3: &str = "b98d2d8c79fcdb79e272d35b226e00235ec5fc17e00fb6e8bc59faa60c2e9783";

fn bench_cmd() -> Command {
    let mut cmd = Command::cargo_bin("tt-matmul-bench").unwrap();
    cmd.env_remove("TT_MATMUL_KERNEL_DIR").env("RUST_LOG", "warn");
    cmd
}

fn kernel_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for rel in ["dataflow/reader_single_core_mm.cpp", "dataflow/writer_single_core_mm.cpp", "compute/mm.cpp"] {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "// kernel\n").unwrap();
    }
    dir
}

fn read_i32(bytes: &[u8], index: usize) -> i32 {
    let at = 240 + index * 4;
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[test]
fn zero_seed_solution_without_device() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.bin");

    bench_cmd()
        .args(["--seed-hex", &"00".repeat(240), "--no-gpu", "--write-sol"])
        .arg(&out)
        .assert()
        .success();

    let bytes = fs::read(&out).unwrap();
    assert_eq!(bytes.len(), 1264);
    assert!(bytes[..240].iter().all(|&b| b == 0));
    assert_eq!(read_i32(&bytes, 0), -1_032_686);
    assert_eq!(read_i32(&bytes, 13), 1_640_580);
    assert_eq!(read_i32(&bytes, 255), -362_992);
    assert_eq!(blake3::hash(&bytes).to_hex().as_str(), ZERO_SEED_SOLUTION_BLAKE3);
}

#[test]
fn seed_file_matches_seed_hex() {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("seed.bin");
    let out = dir.path().join("out.bin");
    fs::write(&seed, [0u8; 240]).unwrap();

    bench_cmd().arg("--seed-file").arg(&seed).arg("--no-gpu").arg("--write-sol").arg(&out).assert().success();

    let bytes = fs::read(&out).unwrap();
    assert_eq!(blake3::hash(&bytes).to_hex().as_str(), ZERO_SEED_SOLUTION_BLAKE3);
}

#[test]
fn rejects_both_seed_sources() {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("seed.bin");
    fs::write(&seed, [0u8; 240]).unwrap();

    bench_cmd().arg("--seed-file").arg(&seed).args(["--seed-hex", "00", "--no-gpu"]).assert().failure();
    bench_cmd().arg("--no-gpu").assert().failure();
}

#[test]
fn rejects_bad_payloads_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.bin");

    for hex in ["00".repeat(239), "00".repeat(241), "0g".repeat(240)] {
        bench_cmd().args(["--seed-hex", &hex, "--no-gpu", "--write-sol"]).arg(&out).assert().failure().code(1);
        assert!(!Path::new(&out).exists());
    }
}

#[test]
fn rejects_zero_iterations() {
    bench_cmd().args(["--seed-hex", &"00".repeat(240), "--iters", "0"]).assert().failure();
    bench_cmd().args(["--seed-hex", &"00".repeat(240), "--warmup", "-1"]).assert().failure();
}

#[test]
fn missing_kernels_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    bench_cmd()
        .args(["--seed-hex", &"00".repeat(240), "--kernel-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .code(1);
}

#[test]
fn device_benchmark_verifies_against_reference() {
    let kernels = kernel_dir();

    let output = bench_cmd()
        .args(["--seed-hex", &"00".repeat(240), "--iters", "1", "--warmup", "0", "--verify", "--json"])
        .env("TT_MATMUL_KERNEL_DIR", kernels.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let device = &report["device"];
    assert_eq!(device["shape"]["m_pad"], 32);
    assert_eq!(device["shape"]["k"], 50240);
    assert_eq!(device["stats"]["iterations"], 1);
    assert!(device["verification"]["max_rel_error"].as_f64().unwrap() < 1.0 / 128.0);
}
