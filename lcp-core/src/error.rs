//! Error types for the lcp placement engine
//!
//! This module provides structured error types using `thiserror`.
//!
//! # Error Hierarchy
//!
//! ```text
//! PlacementError  - estimation and layer planning
//! HardwareError   - host probe failures (degraded, rarely surfaced)
//! ConfigError     - invalid engine configuration (see `config`)
//! ```
//!
//! Running out of memory is *not* an error. The allocator always returns a
//! budget and reports overflow through its storage tier, so callers decide
//! whether to proceed, warn or abort.
//!
//! Application code should wrap these with `anyhow` context:
//!
//! ```rust,ignore
//! use anyhow::Context;
//!
//! let plan = engine
//!     .plan(&path, strategy, None, &profile)
//!     .context("Failed to plan model placement")?;
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while estimating or planning a placement
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    /// The artifact is missing, is not a regular file, or its size is unreadable
    #[error("Cannot read model artifact {}: {reason}", path.display())]
    UnreadableArtifact { path: PathBuf, reason: String },

    /// Layer planning needed a per-layer size that is zero
    #[error(
        "Layer count undefined: {estimated_layers} layers at {memory_per_layer_mb} MB per layer"
    )]
    DivisionUndefined {
        estimated_layers: u32,
        memory_per_layer_mb: f64,
    },
}

impl PlacementError {
    /// Create an unreadable-artifact error
    pub fn unreadable(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::UnreadableArtifact {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while probing the host
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// GPU detection failed
    #[error("GPU detection failed: {0}")]
    GpuDetection(String),

    /// RAM detection failed
    #[error("Memory detection failed: {0}")]
    MemoryDetection(String),

    /// Storage detection failed
    #[error("Storage detection failed: {0}")]
    StorageDetection(String),

    /// Command execution failed
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Parsing error when reading hardware info
    #[error("Failed to parse {location}: {message}")]
    ParseError { location: String, message: String },
}

impl HardwareError {
    /// Create a GPU detection error
    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::GpuDetection(msg.into())
    }

    /// Create a memory detection error
    pub fn memory(msg: impl Into<String>) -> Self {
        Self::MemoryDetection(msg.into())
    }

    /// Create a storage detection error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageDetection(msg.into())
    }

    /// Create a command failure error
    pub fn command(cmd: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: cmd.into(),
            message: msg.into(),
        }
    }

    /// Create a parse error
    pub fn parse(location: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ParseError {
            location: location.into(),
            message: msg.into(),
        }
    }
}
