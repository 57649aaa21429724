//! Error kinds surfaced by the detector core.
//!
//! Configuration problems are fatal at initialization. Undersized or empty
//! input is not an error (it yields zero detections); only structural input
//! problems such as a mismatched texture size are reported here. Transient
//! accelerator failures leave the owning pipeline in an indeterminate state,
//! and the caller is expected to drop and reinitialize it.
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorError {
    /// Bad model, unsupported channel set, or invalid scale parameters.
    Config(String),
    /// Structurally unusable input (e.g. a texture whose size does not match
    /// the pipeline's initialization).
    Input(String),
    /// Transient accelerator failure: context loss or allocation failure.
    Gpu(String),
    /// An error or panic captured from a CPU worker, re-raised on delivery.
    Worker(String),
}

impl DetectorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }
}

impl fmt::Display for DetectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Input(msg) => write!(f, "input error: {msg}"),
            Self::Gpu(msg) => write!(f, "gpu error: {msg}"),
            Self::Worker(msg) => write!(f, "worker error: {msg}"),
        }
    }
}

impl std::error::Error for DetectorError {}

pub type Result<T> = std::result::Result<T, DetectorError>;
