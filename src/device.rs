//! Emulated tiled-matmul accelerator
//!
//! The device owns a set of bf16 bulk-memory buffers and a single in-order
//! command queue serviced by a worker thread. The host only ever submits
//! commands and waits on replies:
//! - writes, program runs and allocations return once enqueued
//! - `finish` and `read_buffer` block until every earlier command is done
//!
//! A program run binds each kernel role to its unit: the reader streams A/B
//! tiles into two bounded staging channels, compute multiplies matched tile
//! pairs and accumulates across K, and the writer drains finished tiles from
//! a third staging channel into bulk memory. The three units run concurrently
//! and each channel holds `pages` tiles, so transfer overlaps compute.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use half::bf16;
use tracing::{debug, info};

use crate::error::{BenchError, BenchResult};
use crate::hardware::{BenchConfig, KernelRole, BF16_BYTES};
use crate::program::{CbIndex, Program};
use crate::tiling::{intra_tile_offset, TilePlan};

/// Number of devices the emulator exposes
pub const EMULATED_DEVICE_COUNT: usize = 1;

/// Handle to a bulk-memory buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub id: usize,
    /// Size in bytes
    pub size: usize,
    /// Transfer page size in bytes
    pub page_size: usize,
}

impl DeviceBuffer {
    /// Address passed to kernels as a runtime argument
    pub fn address(&self) -> u32 {
        self.id as u32
    }

    pub fn elements(&self) -> usize {
        self.size / BF16_BYTES
    }
}

enum Command {
    Allocate { id: usize, elements: usize },
    Write { id: usize, data: Vec<bf16> },
    Run { program: Arc<Program> },
    Read { id: usize, reply: Sender<Result<Vec<bf16>, String>> },
    Finish { reply: Sender<Result<(), String>> },
}

/// In-order command queue of one device
pub struct CommandQueue {
    sender: Option<Sender<Command>>,
}

impl CommandQueue {
    fn submit(&self, command: Command) -> BenchResult<()> {
        self.sender
            .as_ref()
            .ok_or_else(|| BenchError::device("command queue is closed"))?
            .send(command)
            .map_err(|_| BenchError::device("command queue worker has stopped"))
    }

    /// Copy host data into a buffer; returns once enqueued
    pub fn enqueue_write(&self, buffer: &DeviceBuffer, data: Vec<bf16>) -> BenchResult<()> {
        if data.len() != buffer.elements() {
            return Err(BenchError::device(format!(
                "write of {} elements into buffer {} of {} elements",
                data.len(),
                buffer.id,
                buffer.elements()
            )));
        }
        self.submit(Command::Write { id: buffer.id, data })
    }

    /// Submit one run of a program; returns once enqueued
    pub fn enqueue_program(&self, program: &Arc<Program>) -> BenchResult<()> {
        self.submit(Command::Run { program: Arc::clone(program) })
    }

    /// Read a buffer back, waiting for all earlier commands
    pub fn read_buffer(&self, buffer: &DeviceBuffer) -> BenchResult<Vec<bf16>> {
        let (reply, response) = mpsc::channel();
        self.submit(Command::Read { id: buffer.id, reply })?;
        response
            .recv()
            .map_err(|_| BenchError::device("command queue worker has stopped"))?
            .map_err(BenchError::device)
    }

    /// Block until every enqueued command has completed
    pub fn finish(&self) -> BenchResult<()> {
        let (reply, response) = mpsc::channel();
        self.submit(Command::Finish { reply })?;
        response
            .recv()
            .map_err(|_| BenchError::device("command queue worker has stopped"))?
            .map_err(BenchError::device)
    }
}

/// An open accelerator
pub struct Device {
    id: usize,
    queue: CommandQueue,
    worker: Option<JoinHandle<Result<(), String>>>,
    next_buffer: usize,
}

impl Device {
    pub fn open(id: usize) -> BenchResult<Self> {
        if id >= EMULATED_DEVICE_COUNT {
            return Err(BenchError::DeviceUnavailable { id });
        }

        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(format!("device-{}-queue", id))
            .spawn(move || run_queue(receiver))
            .map_err(|e| BenchError::device(format!("failed to start command queue: {}", e)))?;

        info!(device = id, "device opened");
        Ok(Self {
            id,
            queue: CommandQueue { sender: Some(sender) },
            worker: Some(worker),
            next_buffer: 0,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Allocate a zero-filled buffer of `size` bytes
    pub fn create_buffer(&mut self, size: usize, page_size: usize) -> BenchResult<DeviceBuffer> {
        if page_size == 0 || size % page_size != 0 {
            return Err(BenchError::device(format!(
                "buffer size {} is not a whole number of {}-byte pages",
                size, page_size
            )));
        }
        let buffer = DeviceBuffer { id: self.next_buffer, size, page_size };
        self.queue.submit(Command::Allocate { id: buffer.id, elements: buffer.elements() })?;
        self.next_buffer += 1;
        Ok(buffer)
    }

    /// Drain the queue and release the device
    ///
    /// Any fault the queue hit during the session makes close fail.
    pub fn close(mut self) -> BenchResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> BenchResult<()> {
        self.queue.sender.take();
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(Ok(())) => {
                info!(device = self.id, "device closed");
                Ok(())
            }
            Ok(Err(message)) => Err(BenchError::DeviceClose { id: self.id, message }),
            Err(_) => Err(BenchError::DeviceClose {
                id: self.id,
                message: "command queue worker panicked".to_string(),
            }),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("{}", e);
        }
    }
}

/// Bulk memory plus the first fault seen, if any
#[derive(Default)]
struct DeviceMemory {
    buffers: HashMap<usize, Vec<bf16>>,
    fault: Option<String>,
}

impl DeviceMemory {
    fn get(&self, id: usize) -> Result<&[bf16], String> {
        self.buffers.get(&id).map(Vec::as_slice).ok_or_else(|| format!("no buffer at address {}", id))
    }

    fn take(&mut self, id: usize) -> Result<Vec<bf16>, String> {
        self.buffers.remove(&id).ok_or_else(|| format!("no buffer at address {}", id))
    }

    fn record(&mut self, result: Result<(), String>) {
        if let Err(message) = result {
            tracing::error!("device fault: {}", message);
            self.fault.get_or_insert(message);
        }
    }
}

fn run_queue(commands: Receiver<Command>) -> Result<(), String> {
    let mut memory = DeviceMemory::default();

    for command in commands {
        match command {
            Command::Allocate { id, elements } => {
                debug!(id, elements, "allocate");
                memory.buffers.insert(id, vec![bf16::ZERO; elements]);
            }
            Command::Write { id, data } => {
                debug!(id, elements = data.len(), "write");
                let result = match memory.buffers.get_mut(&id) {
                    Some(buffer) if buffer.len() == data.len() => {
                        *buffer = data;
                        Ok(())
                    }
                    Some(buffer) => Err(format!("write size {} != buffer size {}", data.len(), buffer.len())),
                    None => Err(format!("no buffer at address {}", id)),
                };
                memory.record(result);
            }
            Command::Run { program } => {
                debug!("run program");
                let result = if memory.fault.is_some() { Ok(()) } else { run_program(&mut memory, &program) };
                memory.record(result);
            }
            Command::Read { id, reply } => {
                debug!(id, "read");
                let result = match &memory.fault {
                    Some(fault) => Err(fault.clone()),
                    None => memory.get(id).map(<[bf16]>::to_vec),
                };
                let _ = reply.send(result);
            }
            Command::Finish { reply } => {
                debug!("finish");
                let _ = reply.send(memory.fault.clone().map_or(Ok(()), Err));
            }
        }
    }

    match memory.fault {
        Some(fault) => Err(fault),
        None => Ok(()),
    }
}

struct ReaderArgs {
    src0: usize,
    src1: usize,
    plan: TilePlan,
}

struct WriterArgs {
    dst: usize,
    output_tiles: usize,
}

fn kernel_args(program: &Program, role: KernelRole, runtime: bool, expected: usize) -> Result<Vec<usize>, String> {
    let binding = program.kernel(role).ok_or_else(|| format!("program has no {} kernel", role))?;
    let args = if runtime { &binding.runtime_args } else { &binding.compile_args };
    if args.len() != expected {
        return Err(format!("{} kernel expects {} arguments, got {}", role, expected, args.len()));
    }
    Ok(args.iter().map(|&a| a as usize).collect())
}

fn staging_pages(program: &Program, index: CbIndex) -> Result<usize, String> {
    program
        .circular_buffer(index)
        .map(|cb| cb.pages())
        .ok_or_else(|| format!("staging buffer {} not declared", index.index()))
}

fn run_program(memory: &mut DeviceMemory, program: &Program) -> Result<(), String> {
    let reader = kernel_args(program, KernelRole::Reader, true, 5)?;
    let reader = ReaderArgs {
        src0: reader[0],
        src1: reader[1],
        plan: TilePlan { mt: reader[2], kt: reader[3], nt: reader[4] },
    };
    let writer = kernel_args(program, KernelRole::Writer, true, 3)?;
    let writer = WriterArgs { dst: writer[0], output_tiles: writer[1] * writer[2] };
    let compute = kernel_args(program, KernelRole::Compute, false, 3)?;
    let plan = TilePlan { mt: compute[0], kt: compute[1], nt: compute[2] };

    if reader.plan != plan || writer.output_tiles != plan.output_tiles() {
        return Err("reader, compute and writer disagree on the tile plan".to_string());
    }

    let pages = (
        staging_pages(program, CbIndex::In0)?,
        staging_pages(program, CbIndex::In1)?,
        staging_pages(program, CbIndex::Out0)?,
    );

    let mut output = memory.take(writer.dst)?;
    let result = execute(memory, &program.config, &reader, &writer, pages, &mut output);
    memory.buffers.insert(writer.dst, output);
    result
}

fn execute(
    memory: &DeviceMemory,
    config: &BenchConfig,
    reader: &ReaderArgs,
    writer: &WriterArgs,
    (in0_pages, in1_pages, out_pages): (usize, usize, usize),
    output: &mut [bf16],
) -> Result<(), String> {
    let plan = reader.plan;
    let tile = config.tile_elems();
    let a = memory.get(reader.src0)?;
    let b = memory.get(reader.src1)?;

    if a.len() < plan.mt * plan.kt * tile || b.len() < plan.kt * plan.nt * tile {
        return Err("input buffers are smaller than the tile plan".to_string());
    }
    if output.len() < writer.output_tiles * tile {
        return Err("output buffer is smaller than the tile plan".to_string());
    }

    let (a_tx, a_rx) = mpsc::sync_channel::<Vec<bf16>>(in0_pages);
    let (b_tx, b_rx) = mpsc::sync_channel::<Vec<bf16>>(in1_pages);
    let (c_tx, c_rx) = mpsc::sync_channel::<Vec<bf16>>(out_pages);
    let output_tiles = writer.output_tiles;

    thread::scope(|s| {
        let reader = s.spawn(move || read_unit(a, b, &plan, tile, a_tx, b_tx));
        let compute = s.spawn(move || compute_unit(config, &plan, a_rx, b_rx, c_tx));
        let writer = s.spawn(move || write_unit(output, output_tiles, tile, c_rx));

        let reader = reader.join().map_err(|_| "reader unit panicked".to_string())?;
        let compute = compute.join().map_err(|_| "compute unit panicked".to_string())?;
        let writer = writer.join().map_err(|_| "writer unit panicked".to_string())?;
        reader.and(compute).and(writer)
    })
}

fn read_unit(
    a: &[bf16],
    b: &[bf16],
    plan: &TilePlan,
    tile: usize,
    a_tx: SyncSender<Vec<bf16>>,
    b_tx: SyncSender<Vec<bf16>>,
) -> Result<(), String> {
    for step in plan.steps() {
        let a_idx = plan.a_tile(&step);
        let b_idx = plan.b_tile(&step);
        a_tx.send(a[a_idx * tile..(a_idx + 1) * tile].to_vec())
            .map_err(|_| "reader: compute unit stopped".to_string())?;
        b_tx.send(b[b_idx * tile..(b_idx + 1) * tile].to_vec())
            .map_err(|_| "reader: compute unit stopped".to_string())?;
    }
    Ok(())
}

fn compute_unit(
    config: &BenchConfig,
    plan: &TilePlan,
    a_rx: Receiver<Vec<bf16>>,
    b_rx: Receiver<Vec<bf16>>,
    c_tx: SyncSender<Vec<bf16>>,
) -> Result<(), String> {
    let edge = config.tile_size;
    // layout[i] is where row-major element i of a tile sits in faced order
    let layout: Vec<usize> = (0..edge * edge).map(|i| intra_tile_offset(i / edge, i % edge, config)).collect();
    let unpack = |tile: &[bf16]| -> Vec<f32> { layout.iter().map(|&p| tile[p].to_f32()).collect() };

    let mut acc = vec![0f32; edge * edge];
    for step in plan.steps() {
        if step.is_first_k {
            acc.fill(0.0);
        }
        let a_tile = a_rx.recv().map_err(|_| "compute: reader unit stopped".to_string())?;
        let b_tile = b_rx.recv().map_err(|_| "compute: reader unit stopped".to_string())?;
        matmul_tile_acc(&unpack(&a_tile), &unpack(&b_tile), &mut acc, edge);

        if step.is_last_k {
            let mut packed = vec![bf16::ZERO; edge * edge];
            for (i, &p) in layout.iter().enumerate() {
                packed[p] = bf16::from_f32(acc[i]);
            }
            c_tx.send(packed).map_err(|_| "compute: writer unit stopped".to_string())?;
        }
    }
    Ok(())
}

/// `acc += a @ b` on row-major `edge x edge` tiles
fn matmul_tile_acc(a: &[f32], b: &[f32], acc: &mut [f32], edge: usize) {
    for i in 0..edge {
        let acc_row = &mut acc[i * edge..(i + 1) * edge];
        for p in 0..edge {
            let a_val = a[i * edge + p];
            if a_val == 0.0 {
                continue;
            }
            let b_row = &b[p * edge..(p + 1) * edge];
            for (out, &b_val) in acc_row.iter_mut().zip(b_row) {
                *out += a_val * b_val;
            }
        }
    }
}

fn write_unit(output: &mut [bf16], output_tiles: usize, tile: usize, c_rx: Receiver<Vec<bf16>>) -> Result<(), String> {
    for (t, dst) in output.chunks_exact_mut(tile).take(output_tiles).enumerate() {
        let finished = c_rx.recv().map_err(|_| format!("writer: compute unit stopped before tile {}", t))?;
        dst.copy_from_slice(&finished);
    }
    Ok(())
}
