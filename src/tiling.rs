//! Operand layout for the accelerator
//!
//! Operands are padded with zeros up to whole tiles, narrowed to bf16 and
//! reordered from row-major into tile-major order:
//! - tiles are emitted row by row across the matrix
//! - each tile is split into four faces (top-left, top-right, bottom-left,
//!   bottom-right), emitted in that order
//! - each face is row-major
//!
//! For C = A @ B with Mt x Kt tiles in A and Kt x Nt tiles in B, the work
//! plan walks every output tile and, for each, every tile along K.

use half::bf16;
use serde::{Deserialize, Serialize};

use crate::hardware::BenchConfig;
use crate::seed::Operands;

/// Padded extents of a tiled problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiledShape {
    /// Rows of A and C, rounded up to the tile edge
    pub m_pad: usize,
    /// Columns of B and C, rounded up to the tile edge
    pub n_pad: usize,
    /// Contraction length, already tile aligned
    pub k: usize,
    pub tile_size: usize,
}

impl TiledShape {
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            m_pad: config.padded_rows(),
            n_pad: config.padded_cols(),
            k: config.k,
            tile_size: config.tile_size,
        }
    }

    /// Tile counts (Mt, Kt, Nt)
    pub fn tile_counts(&self) -> (usize, usize, usize) {
        (self.m_pad / self.tile_size, self.k / self.tile_size, self.n_pad / self.tile_size)
    }
}

/// Operands in the accelerator's native layout
#[derive(Debug, Clone)]
pub struct TiledOperands {
    pub a: Vec<bf16>,
    pub b: Vec<bf16>,
    pub shape: TiledShape,
}

/// Copy a row-major matrix into a larger zero-filled one, narrowing to bf16
pub fn pad_to_bf16<T>(
    matrix: &[T],
    rows: usize,
    cols: usize,
    target_rows: usize,
    target_cols: usize,
) -> Vec<bf16>
where
    T: Copy + Into<f32>,
{
    let mut result = vec![bf16::ZERO; target_rows * target_cols];
    for i in 0..rows.min(target_rows) {
        for j in 0..cols.min(target_cols) {
            result[i * target_cols + j] = bf16::from_f32(matrix[i * cols + j].into());
        }
    }
    result
}

/// Position of element (`row`, `col`) of a tile inside that tile
pub fn intra_tile_offset(row: usize, col: usize, config: &BenchConfig) -> usize {
    let face = config.face_size;
    let faces_per_row = config.tile_size / face;
    let face_index = (row / face) * faces_per_row + col / face;
    face_index * face * face + (row % face) * face + col % face
}

/// Position of element (`row`, `col`) of a `_ x cols` matrix in tile-major order
pub fn tiled_offset(row: usize, col: usize, cols: usize, config: &BenchConfig) -> usize {
    let tile = config.tile_size;
    let tile_index = (row / tile) * (cols / tile) + col / tile;
    tile_index * config.tile_elems() + intra_tile_offset(row % tile, col % tile, config)
}

/// Reorder a tile-aligned row-major matrix into tile-major order
pub fn tilize<T: Copy + Default>(matrix: &[T], rows: usize, cols: usize, config: &BenchConfig) -> Vec<T> {
    debug_assert_eq!(matrix.len(), rows * cols);
    debug_assert_eq!(rows % config.tile_size, 0);
    debug_assert_eq!(cols % config.tile_size, 0);

    let mut out = vec![T::default(); rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            out[tiled_offset(r, c, cols, config)] = matrix[r * cols + c];
        }
    }
    out
}

/// Inverse of [`tilize`]
pub fn untilize<T: Copy + Default>(tiled: &[T], rows: usize, cols: usize, config: &BenchConfig) -> Vec<T> {
    debug_assert_eq!(tiled.len(), rows * cols);

    let mut out = vec![T::default(); rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            out[r * cols + c] = tiled[tiled_offset(r, c, cols, config)];
        }
    }
    out
}

/// Pad both operands to whole tiles and reorder them for the accelerator
pub fn pad_and_tile(operands: &Operands, config: &BenchConfig) -> TiledOperands {
    let shape = TiledShape::from_config(config);

    let a_pad = pad_to_bf16(&operands.a, config.rows, config.k, shape.m_pad, shape.k);
    let b_pad = pad_to_bf16(&operands.b, config.k, config.cols, shape.k, shape.n_pad);

    TiledOperands {
        a: tilize(&a_pad, shape.m_pad, shape.k, config),
        b: tilize(&b_pad, shape.k, shape.n_pad, config),
        shape,
    }
}

/// Untilize a device result and crop it to the logical `rows x cols`
pub fn extract_result(tiled: &[bf16], config: &BenchConfig) -> Vec<f32> {
    let (m_pad, n_pad) = (config.padded_rows(), config.padded_cols());
    let full = untilize(tiled, m_pad, n_pad, config);
    let mut out = Vec::with_capacity(config.result_len());
    for row in full.chunks_exact(n_pad).take(config.rows) {
        out.extend(row[..config.cols].iter().map(|v| v.to_f32()));
    }
    out
}

/// One step of the tiled work breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileStep {
    /// Output tile row
    pub out_row: usize,
    /// Output tile column
    pub out_col: usize,
    /// Tile index along K
    pub k_index: usize,
    /// First step of this output tile (clear the accumulator)
    pub is_first_k: bool,
    /// Last step of this output tile (emit the result)
    pub is_last_k: bool,
}

/// Fixed per-run work breakdown shared by the reader, compute and writer units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePlan {
    pub mt: usize,
    pub kt: usize,
    pub nt: usize,
}

impl TilePlan {
    pub fn new(shape: &TiledShape) -> Self {
        let (mt, kt, nt) = shape.tile_counts();
        Self { mt, kt, nt }
    }

    /// Steps in issue order: output tiles row-major, K innermost
    pub fn steps(&self) -> impl Iterator<Item = TileStep> + '_ {
        (0..self.mt).flat_map(move |out_row| {
            (0..self.nt).flat_map(move |out_col| {
                (0..self.kt).map(move |k_index| TileStep {
                    out_row,
                    out_col,
                    k_index,
                    is_first_k: k_index == 0,
                    is_last_k: k_index + 1 == self.kt,
                })
            })
        })
    }

    pub fn a_tile(&self, step: &TileStep) -> usize {
        step.out_row * self.kt + step.k_index
    }

    pub fn b_tile(&self, step: &TileStep) -> usize {
        step.k_index * self.nt + step.out_col
    }

    pub fn output_tiles(&self) -> usize {
        self.mt * self.nt
    }

    pub fn total_steps(&self) -> usize {
        self.mt * self.nt * self.kt
    }
}
