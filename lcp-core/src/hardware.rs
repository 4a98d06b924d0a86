//! Host hardware snapshot
//!
//! A [`HardwareProfile`] is captured once and then treated as an immutable
//! value; re-profiling produces a new snapshot. Every probe degrades to a
//! conservative value (no GPU, zero storage) and logs the failure instead of
//! failing the snapshot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{DiskKind, Disks, System};
use tracing::{debug, warn};

use crate::command;
use crate::error::HardwareError;
use crate::parser::{self, GpuDevice, NvidiaSmiParser};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const MB_PER_GB: f64 = 1024.0;

/// Kind of storage backing the model directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Ssd,
    Hdd,
    #[default]
    Unknown,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Ssd => write!(f, "ssd"),
            StorageKind::Hdd => write!(f, "hdd"),
            StorageKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Snapshot of the compute and memory resources of a host.
///
/// Invariants: `available_ram_gb <= system_ram_gb` and
/// `available_vram_gb <= total_vram_gb`. [`HardwareProfile::detect`] enforces
/// them; hand-built profiles are trusted as given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub cpu_cores: u32,
    pub cpu_threads: u32,
    #[serde(default)]
    pub cpu_model: String,
    pub system_ram_gb: f64,
    pub available_ram_gb: f64,
    pub gpu_count: u32,
    pub gpu_models: Vec<String>,
    pub total_vram_gb: f64,
    pub available_vram_gb: f64,
    pub available_storage_gb: f64,
    pub storage_kind: StorageKind,
    #[serde(default)]
    pub platform: String,
    pub captured_at: DateTime<Utc>,
}

impl HardwareProfile {
    /// Capture a snapshot of the current host.
    ///
    /// `storage_path` selects the disk whose free space is reported; the home
    /// directory is used when it is `None`. Fails only when system memory
    /// cannot be read at all.
    pub fn detect(storage_path: Option<&Path>) -> Result<Self, HardwareError> {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        let total_bytes = sys.total_memory();
        if total_bytes == 0 {
            return Err(HardwareError::memory("system reported zero total memory"));
        }
        let system_ram_gb = total_bytes as f64 / BYTES_PER_GB;
        let available_ram_gb = (sys.available_memory() as f64 / BYTES_PER_GB).min(system_ram_gb);

        let cpu_model = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty())
            .unwrap_or_else(|| "Unknown CPU".to_string());

        let gpus = match detect_gpus() {
            Ok(gpus) => gpus,
            Err(e) => {
                debug!(error = %e, "No NVIDIA GPU detected");
                Vec::new()
            }
        };
        let (total_vram_gb, available_vram_gb) = vram_totals(&gpus);

        let storage_path = storage_path.map(Path::to_path_buf).unwrap_or_else(home_dir);
        let (available_storage_gb, storage_kind) = match detect_storage(&storage_path) {
            Ok(storage) => storage,
            Err(e) => {
                warn!(error = %e, path = %storage_path.display(), "Storage probe failed");
                (0.0, StorageKind::Unknown)
            }
        };

        let profile = Self {
            cpu_cores: num_cpus::get_physical() as u32,
            cpu_threads: num_cpus::get() as u32,
            cpu_model,
            system_ram_gb,
            available_ram_gb,
            gpu_count: gpus.len() as u32,
            gpu_models: gpus.into_iter().map(|g| g.name).collect(),
            total_vram_gb,
            available_vram_gb,
            available_storage_gb,
            storage_kind,
            platform: std::env::consts::OS.to_string(),
            captured_at: Utc::now(),
        };

        debug!(
            ram_gb = profile.system_ram_gb,
            vram_gb = profile.total_vram_gb,
            gpus = profile.gpu_count,
            "Captured hardware profile"
        );
        Ok(profile)
    }

    /// Whether the host has enough total VRAM for layer offload to be worthwhile.
    pub fn can_offload_to_gpu(&self, min_vram_gb: f64) -> bool {
        self.total_vram_gb >= min_vram_gb
    }

    /// Available VRAM in megabytes.
    pub fn available_vram_mb(&self) -> f64 {
        self.available_vram_gb * MB_PER_GB
    }
}

/// Query `nvidia-smi`, falling back to its default table when the CSV query
/// yields no rows.
fn detect_gpus() -> Result<Vec<GpuDevice>, HardwareError> {
    let csv = command::probe("nvidia-smi", &parser::nvidia::QUERY_ARGS)?;
    let gpus = NvidiaSmiParser::parse_csv(&csv);
    if !gpus.is_empty() {
        return Ok(gpus);
    }

    let gpus = NvidiaSmiParser::parse_table(&command::probe("nvidia-smi", &[])?);
    if gpus.is_empty() {
        return Err(HardwareError::parse("nvidia-smi output", "no GPU rows"));
    }
    Ok(gpus)
}

/// Summed (total, available) VRAM in GB, with available clamped to total.
fn vram_totals(gpus: &[GpuDevice]) -> (f64, f64) {
    let memory = parser::total_memory(gpus);
    let total = memory.total_mb as f64 / MB_PER_GB;
    let free = memory.free_mb as f64 / MB_PER_GB;
    (total, free.min(total))
}

fn detect_storage(path: &Path) -> Result<(f64, StorageKind), HardwareError> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    let disk = disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .ok_or_else(|| {
            HardwareError::storage(format!("no mounted disk contains {}", path.display()))
        })?;

    let kind = match disk.kind() {
        DiskKind::SSD => StorageKind::Ssd,
        DiskKind::HDD => StorageKind::Hdd,
        DiskKind::Unknown(_) => StorageKind::Unknown,
    };
    Ok((disk.available_space() as f64 / BYTES_PER_GB, kind))
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}
