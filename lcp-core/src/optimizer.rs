//! Launch parameters for a llama.cpp-style inference server
//!
//! Translates a [`PlacementPlan`] and the host profile into server flags. The
//! GPU layer count is forwarded as-is, sentinel included; the runtime caps it
//! at the real layer count.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::engine::PlacementPlan;
use crate::hardware::HardwareProfile;

/// Default bind address of the server
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port
pub const DEFAULT_PORT: u16 = 8080;

/// Server launch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParameters {
    /// Layers to offload (`-ngl`)
    pub n_gpu_layers: u32,
    /// Prompt processing batch size (`-b`)
    pub n_batch: u32,
    /// Generation threads (`-t`)
    pub n_threads: u32,
    /// Batch processing threads (`-tb`)
    pub n_threads_batch: u32,
    /// Context window (`-c`)
    pub context_size: u64,
    pub host: String,
    pub port: u16,
    /// Human-readable placement notes
    #[serde(default)]
    pub notes: Vec<String>,
}

impl LaunchParameters {
    /// Server flags, in the order the server documents them
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "-ngl".to_string(),
            self.n_gpu_layers.to_string(),
            "-b".to_string(),
            self.n_batch.to_string(),
            "-t".to_string(),
            self.n_threads.to_string(),
            "-tb".to_string(),
            self.n_threads_batch.to_string(),
            "-c".to_string(),
            self.context_size.to_string(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ]
    }

    /// Placement notes, one per line
    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

/// Derives [`LaunchParameters`] from a plan
#[derive(Debug, Clone)]
pub struct LaunchOptimizer {
    context_tokens: u64,
    gpu_offload_min_vram_gb: f64,
}

impl LaunchOptimizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            context_tokens: config.context_tokens,
            gpu_offload_min_vram_gb: config.gpu_offload_min_vram_gb,
        }
    }

    pub fn optimize(&self, plan: &PlacementPlan, hardware: &HardwareProfile) -> LaunchParameters {
        let threads = hardware.cpu_threads.max(1);

        LaunchParameters {
            n_gpu_layers: plan.gpu_layers,
            n_batch: self.batch_size(plan.gpu_layers, hardware.total_vram_gb),
            n_threads: threads,
            n_threads_batch: threads,
            context_size: self.context_tokens,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            notes: Self::placement_notes(plan),
        }
    }

    /// Larger batches speed up prompt ingestion at the cost of VRAM. Cards
    /// below the offload gate get the CPU batch size.
    pub fn batch_size(&self, gpu_layers: u32, total_vram_gb: f64) -> u32 {
        if gpu_layers == 0 || total_vram_gb < self.gpu_offload_min_vram_gb {
            128
        } else if total_vram_gb < 16.0 {
            256
        } else if total_vram_gb < 24.0 {
            512
        } else {
            1024
        }
    }

    fn placement_notes(plan: &PlacementPlan) -> Vec<String> {
        let total = plan.metadata.estimated_layers;
        let offloaded = plan.gpu_layers.min(total);
        let budget = &plan.budget;
        let mut notes = Vec::new();

        if offloaded == total && budget.ram_gb == 0.0 && budget.feasible() {
            notes.push("Model fits entirely in VRAM".to_string());
        } else {
            if offloaded == 0 {
                notes.push(format!("Running on CPU: all {total} layers in system RAM"));
            } else {
                notes.push(format!("Splitting model: {offloaded}/{total} layers on GPU"));
            }
            notes.push(format!("GPU: {:.1}GB, CPU: {:.1}GB", budget.vram_gb, budget.ram_gb));
        }

        if !budget.feasible() {
            notes.push(format!(
                "{:.1}GB does not fit in memory and spills to storage",
                budget.storage_gb
            ));
        }
        notes
    }
}

/// Set the GPU layer count in a launch command line.
///
/// An existing `-ngl N` / `--n-gpu-layers N` is rewritten in place; otherwise
/// the flag is inserted before `--host`, or appended when there is none.
pub fn apply_gpu_layers(command: &str, n_gpu_layers: u32) -> String {
    static NGL_REGEX: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(^|\s)(-ngl|--n-gpu-layers)(\s+|=)\d+").expect("Invalid -ngl regex")
    });
    static HOST_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(^|\s)--host(\s|=|$)").expect("Invalid --host regex"));

    if NGL_REGEX.is_match(command) {
        return NGL_REGEX
            .replace_all(command, |caps: &regex::Captures<'_>| {
                format!("{}{}{}{}", &caps[1], &caps[2], &caps[3], n_gpu_layers)
            })
            .into_owned();
    }

    if let Some(m) = HOST_REGEX.find(command) {
        let at = m.start() + m.as_str().len() - m.as_str().trim_start().len();
        let mut rewritten = String::with_capacity(command.len() + 12);
        rewritten.push_str(&command[..at]);
        rewritten.push_str(&format!("-ngl {} ", n_gpu_layers));
        rewritten.push_str(&command[at..]);
        return rewritten;
    }

    let trimmed = command.trim_end();
    if trimmed.is_empty() {
        format!("-ngl {}", n_gpu_layers)
    } else {
        format!("{} -ngl {}", trimmed, n_gpu_layers)
    }
}
