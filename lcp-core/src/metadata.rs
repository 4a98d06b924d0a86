//! Model footprint estimation
//!
//! Layer count, parameter count and embedding width are taken from a fixed
//! table of file-size bands rather than from the tensor data. The header probe
//! only flags artifacts whose declared shape disagrees with their band; the
//! band values stay authoritative for all arithmetic.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::PlacementError;
use crate::gguf::{self, GgufHeader, HeaderFacts};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_ACTIVATION: u64 = 4;

/// Canonical model shape for a range of file sizes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeBand {
    /// Exclusive upper bound of the band, in GB
    pub upper_gb: f64,
    pub layers: u32,
    pub params: u64,
    pub embedding_dim: u32,
}

/// Size bands, smallest first
pub static SIZE_BANDS: [SizeBand; 7] = [
    SizeBand::new(2.0, 22, 1_300_000_000, 2048),
    SizeBand::new(3.0, 32, 3_000_000_000, 3072),
    SizeBand::new(5.0, 32, 7_000_000_000, 4096),
    SizeBand::new(8.0, 40, 13_000_000_000, 5120),
    SizeBand::new(15.0, 40, 14_000_000_000, 5120),
    SizeBand::new(25.0, 60, 30_000_000_000, 6656),
    SizeBand::new(f64::INFINITY, 80, 70_000_000_000, 8192),
];

impl SizeBand {
    const fn new(upper_gb: f64, layers: u32, params: u64, embedding_dim: u32) -> Self {
        Self {
            upper_gb,
            layers,
            params,
            embedding_dim,
        }
    }

    /// Band containing `file_size_gb`.
    pub fn for_size(file_size_gb: f64) -> &'static SizeBand {
        SIZE_BANDS
            .iter()
            .find(|band| file_size_gb < band.upper_gb)
            .unwrap_or(&SIZE_BANDS[SIZE_BANDS.len() - 1])
    }
}

/// Header metadata that disagrees with the size band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderDivergence {
    pub header_layers: Option<u64>,
    pub header_embedding_dim: Option<u64>,
    pub band_layers: u32,
    pub band_embedding_dim: u32,
}

impl HeaderDivergence {
    fn detect(facts: &HeaderFacts, band: &SizeBand) -> Option<Self> {
        let layers_differ = facts.block_count.is_some_and(|n| n != u64::from(band.layers));
        let embedding_differs =
            facts.embedding_length.is_some_and(|n| n != u64::from(band.embedding_dim));

        (layers_differ || embedding_differs).then(|| Self {
            header_layers: facts.block_count,
            header_embedding_dim: facts.embedding_length,
            band_layers: band.layers,
            band_embedding_dim: band.embedding_dim,
        })
    }
}

/// Approximate shape and memory footprint of a model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub estimated_layers: u32,
    pub estimated_params: u64,
    pub embedding_dim: u32,
    pub file_size_gb: f64,
    /// Weights plus runtime buffers
    pub model_memory_mb: u64,
    /// KV buffers for the configured context length
    pub context_memory_mb: u64,
    /// Constant floor for activations and scratch space
    pub overhead_memory_mb: u64,
    #[serde(default)]
    pub magic_present: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<GgufHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<HeaderDivergence>,
}

impl ModelMetadata {
    /// Model, context and overhead memory combined
    pub fn total_memory_mb(&self) -> u64 {
        self.model_memory_mb
            .saturating_add(self.context_memory_mb)
            .saturating_add(self.overhead_memory_mb)
    }

    /// Total demand in GB, the unit the allocator works in
    pub fn total_required_gb(&self) -> f64 {
        self.total_memory_mb() as f64 / 1024.0
    }

    /// Average weight memory per layer; zero when there are no layers
    pub fn memory_per_layer_mb(&self) -> f64 {
        if self.estimated_layers == 0 {
            return 0.0;
        }
        self.model_memory_mb as f64 / f64::from(self.estimated_layers)
    }
}

/// Estimates [`ModelMetadata`] from an artifact on disk or a bare size
#[derive(Debug, Clone)]
pub struct ModelMetadataEstimator {
    context_tokens: u64,
    overhead_floor_mb: u64,
    runtime_buffer_factor: f64,
}

impl ModelMetadataEstimator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            context_tokens: config.context_tokens,
            overhead_floor_mb: config.overhead_floor_mb,
            runtime_buffer_factor: config.runtime_buffer_factor,
        }
    }

    /// Estimate the footprint of the artifact at `path`.
    ///
    /// Fails only when the file size cannot be determined. A file that exists
    /// but cannot be opened, or lacks the GGUF magic, is estimated from its
    /// size alone.
    pub fn estimate(&self, path: &Path) -> Result<ModelMetadata, PlacementError> {
        let meta =
            fs::metadata(path).map_err(|e| PlacementError::unreadable(path, e.to_string()))?;
        if !meta.is_file() {
            return Err(PlacementError::unreadable(path, "not a regular file"));
        }

        let file_size_gb = meta.len() as f64 / BYTES_PER_GB;
        let metadata = self.estimate_from_size(file_size_gb);

        match File::open(path) {
            Ok(file) => Ok(self.refine_with_header(metadata, BufReader::new(file), path)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Artifact unopenable, using size heuristics"
                );
                Ok(metadata)
            }
        }
    }

    /// Attach header facts read from `reader` to a size-based estimate.
    ///
    /// A reader that fails leaves the estimate untouched apart from a warning.
    pub fn refine_with_header<R: Read>(
        &self,
        mut metadata: ModelMetadata,
        reader: R,
        path: &Path,
    ) -> ModelMetadata {
        let probe = match gguf::probe(reader) {
            Ok(probe) => probe,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Header unreadable, using size heuristics"
                );
                return metadata;
            }
        };

        if !probe.magic_present {
            warn!(path = %path.display(), "Missing GGUF magic, using size heuristics");
        }
        metadata.magic_present = probe.magic_present;
        metadata.header = probe.header;

        let band = SizeBand::for_size(metadata.file_size_gb);
        metadata.divergence = HeaderDivergence::detect(&probe.facts, band);
        if let Some(ref d) = metadata.divergence {
            warn!(
                path = %path.display(),
                header_layers = ?d.header_layers,
                header_embedding_dim = ?d.header_embedding_dim,
                band_layers = d.band_layers,
                band_embedding_dim = d.band_embedding_dim,
                "Header shape differs from size estimate"
            );
        }
        metadata.architecture = probe.facts.architecture;

        debug!(
            path = %path.display(),
            size_gb = metadata.file_size_gb,
            layers = metadata.estimated_layers,
            total_mb = metadata.total_memory_mb(),
            "Estimated model footprint"
        );
        metadata
    }

    /// Estimate from a file size alone. Negative or non-finite sizes count as 0.
    pub fn estimate_from_size(&self, file_size_gb: f64) -> ModelMetadata {
        let file_size_gb = if file_size_gb.is_finite() {
            file_size_gb.max(0.0)
        } else {
            0.0
        };
        let band = SizeBand::for_size(file_size_gb);

        let model_memory_mb = (file_size_gb * 1024.0 * self.runtime_buffer_factor) as u64;
        let context_memory_mb = self
            .context_tokens
            .saturating_mul(u64::from(band.embedding_dim) * BYTES_PER_ACTIVATION)
            / BYTES_PER_MB;

        ModelMetadata {
            estimated_layers: band.layers,
            estimated_params: band.params,
            embedding_dim: band.embedding_dim,
            file_size_gb,
            model_memory_mb,
            context_memory_mb,
            overhead_memory_mb: self.overhead_floor_mb,
            magic_present: false,
            header: None,
            architecture: None,
            divergence: None,
        }
    }
}
