//! Pipeline session: the device-side resources of one benchmark run
//!
//! State machine:
//! `Uninitialized -> Configured -> Staged -> Enqueued <-> Completed -> Closed`
//!
//! Kernel programs are located before the device is opened, so a missing
//! program never leaves device state behind.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use half::bf16;
use tracing::{info, warn};

use crate::device::{Device, DeviceBuffer};
use crate::error::{BenchError, BenchResult};
use crate::hardware::{BenchConfig, KernelRole, KernelSet, BF16_BYTES};
use crate::program::{matmul_program, Program};
use crate::tiling::{TilePlan, TiledOperands, TiledShape};

/// Lifecycle of a [`PipelineSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// Buffers and staging areas declared, program built
    Configured,
    /// Operands copied into bulk memory
    Staged,
    /// Work submitted, completion not yet observed
    Enqueued,
    /// All submitted work confirmed finished
    Completed,
    /// Device released
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Configured => "configured",
            SessionState::Staged => "staged",
            SessionState::Enqueued => "enqueued",
            SessionState::Completed => "completed",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

struct SessionBuffers {
    a: DeviceBuffer,
    b: DeviceBuffer,
    c: DeviceBuffer,
}

/// Exclusive owner of a device, its buffers and the matmul program
pub struct PipelineSession {
    config: BenchConfig,
    shape: TiledShape,
    plan: TilePlan,
    state: SessionState,
    device: Option<Device>,
    buffers: Option<SessionBuffers>,
    program: Option<Arc<Program>>,
}

impl PipelineSession {
    pub fn new(config: BenchConfig) -> Self {
        let shape = TiledShape::from_config(&config);
        Self {
            config,
            shape,
            plan: TilePlan::new(&shape),
            state: SessionState::Uninitialized,
            device: None,
            buffers: None,
            program: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn shape(&self) -> &TiledShape {
        &self.shape
    }

    pub fn plan(&self) -> &TilePlan {
        &self.plan
    }

    fn expect_state(&self, action: &'static str, allowed: &[SessionState]) -> BenchResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(BenchError::InvalidState { action, state: self.state.to_string() })
        }
    }

    fn device(&self) -> BenchResult<&Device> {
        self.device.as_ref().ok_or_else(|| BenchError::device("session has no device"))
    }

    fn buffers(&self) -> BenchResult<&SessionBuffers> {
        self.buffers.as_ref().ok_or_else(|| BenchError::device("session has no buffers"))
    }

    /// Open the device, allocate bulk memory and build the program
    pub fn configure(&mut self, kernels: &KernelSet, device_id: usize) -> BenchResult<()> {
        self.expect_state("configure", &[SessionState::Uninitialized])?;
        for role in KernelRole::ALL {
            let source = kernels.get(role);
            let digest = source.fingerprint()?;
            info!(%role, path = %source.path.display(), %digest, "kernel located");
        }

        let mut device = Device::open(device_id)?;
        let page = self.config.tile_bytes();
        let a = device.create_buffer(self.shape.m_pad * self.shape.k * BF16_BYTES, page)?;
        let b = device.create_buffer(self.shape.k * self.shape.n_pad * BF16_BYTES, page)?;
        let c = device.create_buffer(self.shape.m_pad * self.shape.n_pad * BF16_BYTES, page)?;
        let program = matmul_program(&self.config, &self.plan, kernels, &a, &b, &c)?;

        info!(
            device = device_id,
            mt = self.plan.mt,
            kt = self.plan.kt,
            nt = self.plan.nt,
            staging_tiles = self.config.staging_tiles,
            "pipeline configured"
        );
        self.device = Some(device);
        self.buffers = Some(SessionBuffers { a, b, c });
        self.program = Some(Arc::new(program));
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Copy tiled operands into bulk memory
    pub fn stage(&mut self, operands: &TiledOperands) -> BenchResult<()> {
        self.expect_state("stage", &[SessionState::Configured])?;
        if operands.shape != self.shape {
            return Err(BenchError::config(format!(
                "operands tiled as {:?}, session configured for {:?}",
                operands.shape, self.shape
            )));
        }

        let buffers = self.buffers()?;
        let queue = self.device()?.queue();
        queue.enqueue_write(&buffers.a, operands.a.clone())?;
        queue.enqueue_write(&buffers.b, operands.b.clone())?;

        info!(bytes = (operands.a.len() + operands.b.len()) * BF16_BYTES, "operands staged");
        self.state = SessionState::Staged;
        Ok(())
    }

    /// Submit one pipeline run; does not wait for it
    pub fn enqueue(&mut self) -> BenchResult<()> {
        self.expect_state(
            "enqueue",
            &[SessionState::Staged, SessionState::Enqueued, SessionState::Completed],
        )?;
        let program = self.program.as_ref().ok_or_else(|| BenchError::device("session has no program"))?;
        self.device()?.queue().enqueue_program(program)?;
        self.state = SessionState::Enqueued;
        Ok(())
    }

    /// Block until every submitted run has finished
    pub fn synchronize(&mut self) -> BenchResult<()> {
        self.expect_state(
            "synchronize",
            &[SessionState::Staged, SessionState::Enqueued, SessionState::Completed],
        )?;
        self.device()?.queue().finish()?;
        self.state = SessionState::Completed;
        Ok(())
    }

    /// Blocking readback of the tiled result
    pub fn read_output(&mut self) -> BenchResult<Vec<bf16>> {
        self.expect_state("read output", &[SessionState::Enqueued, SessionState::Completed])?;
        let output = self.device()?.queue().read_buffer(&self.buffers()?.c)?;
        self.state = SessionState::Completed;
        Ok(output)
    }

    /// Release the device; a failed teardown is returned, never dropped
    pub fn close(&mut self) -> BenchResult<()> {
        self.state = SessionState::Closed;
        self.program = None;
        self.buffers = None;
        match self.device.take() {
            Some(device) => device.close(),
            None => Ok(()),
        }
    }
}

impl Drop for PipelineSession {
    fn drop(&mut self) {
        if self.device.is_some() {
            warn!(state = %self.state, "pipeline session dropped without close");
            if let Err(e) = self.close() {
                tracing::error!("{}", e);
            }
        }
    }
}

/// Configure a session, stage the operands and submit the first run
pub fn build_and_run(
    operands: &TiledOperands,
    config: &BenchConfig,
    kernel_dir: impl AsRef<Path>,
    device_id: usize,
) -> BenchResult<PipelineSession> {
    let kernels = KernelSet::locate(kernel_dir)?;
    let mut session = PipelineSession::new(*config);
    session.configure(&kernels, device_id)?;
    session.stage(operands)?;
    session.enqueue()?;
    Ok(session)
}
