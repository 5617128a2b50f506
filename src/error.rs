//! Error types for the matmul benchmark harness

use std::path::PathBuf;

use thiserror::Error;

/// Result type for harness operations
pub type BenchResult<T> = Result<T, BenchError>;

/// Harness errors
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Seed must be {expected} bytes, got {got}")]
    InvalidSeedLength { expected: usize, got: usize },

    #[error("Unexpected seed payload size: {got} (accepted: {accepted:?})")]
    PayloadSize { got: usize, accepted: Vec<usize> },

    #[error("Invalid hex input: {message}")]
    Hex { message: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Kernel sources not found under: {dir} (missing {missing:?})")]
    KernelsMissing { dir: PathBuf, missing: Vec<PathBuf> },

    #[error("Device {id} is not available")]
    DeviceUnavailable { id: usize },

    #[error("Failed to close device {id}: {message}")]
    DeviceClose { id: usize, message: String },

    #[error("Device error: {message}")]
    Device { message: String },

    #[error("Invalid session transition: cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("Verification failed: {message}")]
    Verification { message: String },
}

/// Coarse error class, used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    InputFormat,
    Resource,
    Execution,
}

impl BenchError {
    pub fn config(msg: impl Into<String>) -> Self {
        BenchError::Config { message: msg.into() }
    }

    pub fn hex(msg: impl Into<String>) -> Self {
        BenchError::Hex { message: msg.into() }
    }

    pub fn device(msg: impl Into<String>) -> Self {
        BenchError::Device { message: msg.into() }
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        BenchError::Verification { message: msg.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BenchError::Io { path: path.into(), source }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BenchError::Config { .. } => ErrorCategory::Configuration,
            BenchError::InvalidSeedLength { .. }
            | BenchError::PayloadSize { .. }
            | BenchError::Hex { .. }
            | BenchError::Io { .. } => ErrorCategory::InputFormat,
            BenchError::KernelsMissing { .. }
            | BenchError::DeviceUnavailable { .. }
            | BenchError::DeviceClose { .. }
            | BenchError::Device { .. } => ErrorCategory::Resource,
            BenchError::InvalidState { .. } | BenchError::Verification { .. } => {
                ErrorCategory::Execution
            }
        }
    }
}
