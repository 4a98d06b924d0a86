//! Parsers for host probe tool output
//!
//! Probe tools change their output between driver releases, so parsers are
//! lenient: malformed rows are skipped rather than failing the snapshot.

pub mod nvidia;

pub use nvidia::NvidiaSmiParser;

/// Memory reading for a single GPU, in megabytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuMemoryInfo {
    /// Total VRAM in megabytes
    pub total_mb: u64,
    /// Free VRAM in megabytes
    pub free_mb: u64,
}

/// One GPU as reported by the probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuDevice {
    /// Model name (e.g., "NVIDIA GeForce RTX 4090")
    pub name: String,
    /// Memory reading
    pub memory: GpuMemoryInfo,
}

/// Sum the memory of several devices.
pub fn total_memory(devices: &[GpuDevice]) -> GpuMemoryInfo {
    devices.iter().fold(GpuMemoryInfo::default(), |acc, d| GpuMemoryInfo {
        total_mb: acc.total_mb.saturating_add(d.memory.total_mb),
        free_mb: acc.free_mb.saturating_add(d.memory.free_mb),
    })
}
