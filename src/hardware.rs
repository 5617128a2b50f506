//! Hardware interface definitions for the tiled matmul accelerator
//!
//! [`BenchConfig`] is the one immutable description of the benchmark problem
//! and of the accelerator's tile geometry. [`KernelSet`] locates the opaque
//! reader, writer and compute programs by role.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};

/// Bytes per element of the accelerator's bf16 working format
pub const BF16_BYTES: usize = 2;

/// Problem shape and tile geometry for a benchmark run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Rows of A and of the result
    pub rows: usize,
    /// Columns of B and of the result
    pub cols: usize,
    /// Contraction length (columns of A, rows of B)
    pub k: usize,
    /// Seed length in bytes
    pub seed_size: usize,
    /// Reserved bytes drawn after B by the expander
    pub reserved_tail: usize,
    /// Tile edge length
    pub tile_size: usize,
    /// Face edge length inside a tile
    pub face_size: usize,
    /// Tiles held by each staging buffer
    pub staging_tiles: usize,
}

impl BenchConfig {
    /// The fixed benchmark workload: 16x50240 @ 50240x16 on 32x32 tiles
    pub const fn benchmark() -> Self {
        Self {
            rows: 16,
            cols: 16,
            k: 50240,
            seed_size: 240,
            reserved_tail: 16 * 64,
            tile_size: 32,
            face_size: 16,
            staging_tiles: 2,
        }
    }

    /// Same geometry as [`BenchConfig::benchmark`] with another problem shape
    pub fn with_shape(rows: usize, cols: usize, k: usize) -> BenchResult<Self> {
        let config = Self { rows, cols, k, ..Self::benchmark() };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.rows == 0 || self.cols == 0 || self.k == 0 {
            return Err(BenchError::config("matrix dimensions must be non-zero"));
        }
        if self.face_size == 0 || self.tile_size % self.face_size != 0 {
            return Err(BenchError::config(format!(
                "tile size {} is not a multiple of face size {}",
                self.tile_size, self.face_size
            )));
        }
        if self.k % self.tile_size != 0 {
            return Err(BenchError::config(format!(
                "contraction length {} is not a multiple of the tile size {}",
                self.k, self.tile_size
            )));
        }
        if self.staging_tiles < 2 {
            return Err(BenchError::config("staging buffers must hold at least two tiles"));
        }
        Ok(())
    }

    pub fn a_len(&self) -> usize {
        self.rows * self.k
    }

    pub fn b_len(&self) -> usize {
        self.k * self.cols
    }

    pub fn result_len(&self) -> usize {
        self.rows * self.cols
    }

    /// Bytes drawn from the XOF: A, B and the reserved tail
    pub fn expansion_len(&self) -> usize {
        self.a_len() + self.b_len() + self.reserved_tail
    }

    /// Input payload sizes accepted by the loader, smallest first
    pub fn accepted_payload_sizes(&self) -> [usize; 3] {
        let ab = self.a_len() + self.b_len();
        [self.seed_size, self.seed_size + ab, self.seed_size + ab + self.reserved_tail]
    }

    pub fn solution_len(&self) -> usize {
        self.seed_size + self.result_len() * 4
    }

    fn round_up(&self, n: usize) -> usize {
        (n + self.tile_size - 1) / self.tile_size * self.tile_size
    }

    pub fn padded_rows(&self) -> usize {
        self.round_up(self.rows)
    }

    pub fn padded_cols(&self) -> usize {
        self.round_up(self.cols)
    }

    /// Tile counts along the row, contraction and column axes (Mt, Kt, Nt)
    pub fn tile_counts(&self) -> (usize, usize, usize) {
        (
            self.padded_rows() / self.tile_size,
            self.k / self.tile_size,
            self.padded_cols() / self.tile_size,
        )
    }

    pub fn tile_elems(&self) -> usize {
        self.tile_size * self.tile_size
    }

    pub fn tile_bytes(&self) -> usize {
        self.tile_elems() * BF16_BYTES
    }

    /// Operations per run, one multiply and one add per contraction step
    pub fn ops_per_run(&self) -> f64 {
        2.0 * self.padded_rows() as f64 * self.padded_cols() as f64 * self.k as f64
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::benchmark()
    }
}

/// Role of an opaque kernel program within the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelRole {
    /// Streams A and B tiles from bulk memory into staging
    Reader,
    /// Drains finished output tiles to bulk memory
    Writer,
    /// Multiplies staged tile pairs
    Compute,
}

impl KernelRole {
    pub const ALL: [KernelRole; 3] = [KernelRole::Reader, KernelRole::Writer, KernelRole::Compute];

    /// Location of the program source relative to the kernel directory
    pub fn relative_path(&self) -> PathBuf {
        match self {
            KernelRole::Reader => Path::new("dataflow").join("reader_single_core_mm.cpp"),
            KernelRole::Writer => Path::new("dataflow").join("writer_single_core_mm.cpp"),
            KernelRole::Compute => Path::new("compute").join("mm.cpp"),
        }
    }
}

impl fmt::Display for KernelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelRole::Reader => write!(f, "reader"),
            KernelRole::Writer => write!(f, "writer"),
            KernelRole::Compute => write!(f, "compute"),
        }
    }
}

/// A located kernel program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    pub role: KernelRole,
    pub path: PathBuf,
}

impl KernelSource {
    /// BLAKE3 digest of the program source, hex encoded
    pub fn fingerprint(&self) -> BenchResult<String> {
        let bytes = fs::read(&self.path).map_err(|e| BenchError::io(&self.path, e))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// The three programs a pipeline needs
#[derive(Debug, Clone)]
pub struct KernelSet {
    pub dir: PathBuf,
    pub reader: KernelSource,
    pub writer: KernelSource,
    pub compute: KernelSource,
}

impl KernelSet {
    /// Locate every role under `dir`, failing if any program is absent
    pub fn locate(dir: impl AsRef<Path>) -> BenchResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let missing: Vec<PathBuf> = KernelRole::ALL
            .iter()
            .map(|role| dir.join(role.relative_path()))
            .filter(|path| !path.is_file())
            .collect();
        if !missing.is_empty() {
            return Err(BenchError::KernelsMissing { dir, missing });
        }

        let source = |role: KernelRole| KernelSource { role, path: dir.join(role.relative_path()) };
        Ok(Self {
            reader: source(KernelRole::Reader),
            writer: source(KernelRole::Writer),
            compute: source(KernelRole::Compute),
            dir,
        })
    }

    pub fn get(&self, role: KernelRole) -> &KernelSource {
        match role {
            KernelRole::Reader => &self.reader,
            KernelRole::Writer => &self.writer,
            KernelRole::Compute => &self.compute,
        }
    }
}

#[cfg(test)]
pub(crate) fn write_kernel_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for role in KernelRole::ALL {
        let path = dir.path().join(role.relative_path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("// {} kernel\n", role)).unwrap();
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_config() {
        let config = BenchConfig::benchmark();
        assert_eq!(config.padded_rows(), 32);
        assert_eq!(config.padded_cols(), 32);
        assert_eq!(config.tile_counts(), (1, 1570, 1));
        assert_eq!(config.tile_bytes(), 2048);
        assert_eq!(config.solution_len(), 1264);
        assert_eq!(config.accepted_payload_sizes(), [240, 1_607_920, 1_608_944]);
        assert_eq!(config.ops_per_run(), 2.0 * 32.0 * 32.0 * 50240.0);
    }

    #[test]
    fn test_with_shape_rejects_unaligned_k() {
        assert!(BenchConfig::with_shape(4, 4, 64).is_ok());
        assert!(BenchConfig::with_shape(4, 4, 48).is_err());
        assert!(BenchConfig::with_shape(0, 4, 64).is_err());
    }

    #[test]
    fn test_locate_kernels() {
        let dir = write_kernel_dir();
        let set = KernelSet::locate(dir.path()).unwrap();
        assert!(set.compute.path.ends_with("compute/mm.cpp"));
        assert_eq!(set.get(KernelRole::Reader).role, KernelRole::Reader);
        assert_eq!(set.reader.fingerprint().unwrap().len(), 64);
    }

    #[test]
    fn test_locate_reports_missing_programs() {
        let dir = write_kernel_dir();
        fs::remove_file(dir.path().join(KernelRole::Writer.relative_path())).unwrap();

        match KernelSet::locate(dir.path()) {
            Err(BenchError::KernelsMissing { missing, .. }) => {
                assert_eq!(missing, vec![dir.path().join("dataflow/writer_single_core_mm.cpp")]);
            }
            other => panic!("Expected KernelsMissing, got {:?}", other),
        }
    }
}
