//! Program construction for the matmul pipeline
//!
//! A [`Program`] is the fixed, per-run description the device executes:
//! the staging buffers and the three kernel bindings with their compile-time
//! and runtime arguments. Nothing in it is discovered at run time.

use serde::Serialize;

use crate::device::DeviceBuffer;
use crate::error::{BenchError, BenchResult};
use crate::hardware::{BenchConfig, KernelRole, KernelSet, KernelSource};
use crate::tiling::TilePlan;

/// Element format held by a staging buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataFormat {
    /// bf16
    Float16B,
}

/// Staging buffer slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CbIndex {
    /// A tiles, reader -> compute
    In0,
    /// B tiles, reader -> compute
    In1,
    /// C tiles, compute -> writer
    Out0,
}

impl CbIndex {
    pub fn index(&self) -> u8 {
        match self {
            CbIndex::In0 => 0,
            CbIndex::In1 => 1,
            CbIndex::Out0 => 16,
        }
    }
}

/// A bounded staging buffer between two units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircularBufferConfig {
    pub index: CbIndex,
    pub format: DataFormat,
    pub page_size: usize,
    pub total_size: usize,
}

impl CircularBufferConfig {
    /// Number of tiles the buffer holds at once
    pub fn pages(&self) -> usize {
        self.total_size / self.page_size
    }
}

/// A kernel program bound to its arguments
#[derive(Debug, Clone)]
pub struct KernelBinding {
    pub source: KernelSource,
    pub compile_args: Vec<u32>,
    pub runtime_args: Vec<u32>,
}

/// Everything the device needs to run one pass of the pipeline
#[derive(Debug, Clone)]
pub struct Program {
    pub config: BenchConfig,
    pub circular_buffers: Vec<CircularBufferConfig>,
    pub kernels: Vec<KernelBinding>,
}

impl Program {
    pub fn kernel(&self, role: KernelRole) -> Option<&KernelBinding> {
        self.kernels.iter().find(|k| k.source.role == role)
    }

    pub fn circular_buffer(&self, index: CbIndex) -> Option<&CircularBufferConfig> {
        self.circular_buffers.iter().find(|cb| cb.index == index)
    }
}

/// Incrementally declares staging buffers and kernels
pub struct ProgramBuilder {
    config: BenchConfig,
    circular_buffers: Vec<CircularBufferConfig>,
    kernels: Vec<KernelBinding>,
}

impl ProgramBuilder {
    pub fn new(config: BenchConfig) -> Self {
        Self {
            config,
            circular_buffers: Vec::new(),
            kernels: Vec::new(),
        }
    }

    pub fn create_circular_buffer(&mut self, index: CbIndex, pages: usize) -> &mut Self {
        let page_size = self.config.tile_bytes();
        self.circular_buffers.push(CircularBufferConfig {
            index,
            format: DataFormat::Float16B,
            page_size,
            total_size: pages * page_size,
        });
        self
    }

    pub fn create_kernel(&mut self, source: &KernelSource, compile_args: Vec<u32>) -> &mut Self {
        self.kernels.push(KernelBinding {
            source: source.clone(),
            compile_args,
            runtime_args: Vec::new(),
        });
        self
    }

    pub fn set_runtime_args(&mut self, role: KernelRole, args: Vec<u32>) -> BenchResult<&mut Self> {
        let binding = self
            .kernels
            .iter_mut()
            .find(|k| k.source.role == role)
            .ok_or_else(|| BenchError::config(format!("no {} kernel declared", role)))?;
        binding.runtime_args = args;
        Ok(self)
    }

    pub fn build(self) -> BenchResult<Program> {
        for role in KernelRole::ALL {
            if !self.kernels.iter().any(|k| k.source.role == role) {
                return Err(BenchError::config(format!("program has no {} kernel", role)));
            }
        }
        for cb in &self.circular_buffers {
            if cb.pages() < 2 {
                return Err(BenchError::config(format!(
                    "staging buffer {} holds {} tile(s); double buffering needs 2",
                    cb.index.index(),
                    cb.pages()
                )));
            }
        }
        Ok(Program {
            config: self.config,
            circular_buffers: self.circular_buffers,
            kernels: self.kernels,
        })
    }
}

fn arg(value: usize) -> BenchResult<u32> {
    u32::try_from(value).map_err(|_| BenchError::config(format!("kernel argument {} overflows u32", value)))
}

/// Build the reader / compute / writer program for `C = A @ B`
pub fn matmul_program(
    config: &BenchConfig,
    plan: &TilePlan,
    kernels: &KernelSet,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    c: &DeviceBuffer,
) -> BenchResult<Program> {
    let (mt, kt, nt) = (arg(plan.mt)?, arg(plan.kt)?, arg(plan.nt)?);
    let mut builder = ProgramBuilder::new(*config);

    builder
        .create_circular_buffer(CbIndex::In0, config.staging_tiles)
        .create_circular_buffer(CbIndex::In1, config.staging_tiles)
        .create_circular_buffer(CbIndex::Out0, config.staging_tiles)
        .create_kernel(&kernels.reader, vec![arg(a.page_size)?, arg(b.page_size)?])
        .create_kernel(&kernels.writer, vec![arg(c.page_size)?])
        .create_kernel(&kernels.compute, vec![mt, kt, nt]);

    builder.set_runtime_args(KernelRole::Reader, vec![a.address(), b.address(), mt, kt, nt])?;
    builder.set_runtime_args(KernelRole::Writer, vec![c.address(), mt, nt])?;

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::write_kernel_dir;
    use pretty_assertions::assert_eq;

    fn buffer(id: usize, tiles: usize) -> DeviceBuffer {
        let config = BenchConfig::benchmark();
        DeviceBuffer { id, size: tiles * config.tile_bytes(), page_size: config.tile_bytes() }
    }

    #[test]
    fn test_matmul_program_layout() {
        let dir = write_kernel_dir();
        let kernels = KernelSet::locate(dir.path()).unwrap();
        let config = BenchConfig::benchmark();
        let plan = TilePlan { mt: 1, kt: 1570, nt: 1 };

        let program =
            matmul_program(&config, &plan, &kernels, &buffer(0, 1570), &buffer(1, 1570), &buffer(2, 1))
                .unwrap();

        assert_eq!(program.circular_buffers.len(), 3);
        let out = program.circular_buffer(CbIndex::Out0).unwrap();
        assert_eq!(out.pages(), 2);
        assert_eq!(out.page_size, 2048);

        let reader = program.kernel(KernelRole::Reader).unwrap();
        assert_eq!(reader.runtime_args, vec![0, 1, 1, 1570, 1]);
        assert_eq!(reader.compile_args, vec![2048, 2048]);
        assert_eq!(program.kernel(KernelRole::Writer).unwrap().runtime_args, vec![2, 1, 1]);
        assert_eq!(program.kernel(KernelRole::Compute).unwrap().compile_args, vec![1, 1570, 1]);
    }

    #[test]
    fn test_build_requires_every_role() {
        let dir = write_kernel_dir();
        let kernels = KernelSet::locate(dir.path()).unwrap();
        let mut builder = ProgramBuilder::new(BenchConfig::benchmark());
        builder.create_kernel(&kernels.reader, vec![]);
        assert!(builder.set_runtime_args(KernelRole::Writer, vec![]).is_err());
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_build_rejects_single_buffering() {
        let dir = write_kernel_dir();
        let kernels = KernelSet::locate(dir.path()).unwrap();
        let mut builder = ProgramBuilder::new(BenchConfig::benchmark());
        builder
            .create_circular_buffer(CbIndex::In0, 1)
            .create_kernel(&kernels.reader, vec![])
            .create_kernel(&kernels.writer, vec![])
            .create_kernel(&kernels.compute, vec![]);
        assert!(matches!(builder.build(), Err(BenchError::Config { .. })));
    }
}
