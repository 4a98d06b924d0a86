//! Host-level model size and quantization recommendations

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::hardware::HardwareProfile;

/// Quantization tier, highest fidelity first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum QuantizationTier {
    Q5_K_M,
    Q4_K_M,
    Q4_K_S,
    Q3_K_M,
}

impl QuantizationTier {
    /// Name as used in GGUF file names
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantizationTier::Q5_K_M => "Q5_K_M",
            QuantizationTier::Q4_K_M => "Q4_K_M",
            QuantizationTier::Q4_K_S => "Q4_K_S",
            QuantizationTier::Q3_K_M => "Q3_K_M",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            QuantizationTier::Q5_K_M => "highest fidelity",
            QuantizationTier::Q4_K_M => "balanced",
            QuantizationTier::Q4_K_S => "compact",
            QuantizationTier::Q3_K_M => "minimal",
        }
    }
}

impl fmt::Display for QuantizationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum recommended model size (GB) for each tier, evaluated in order.
/// Anything below the last entry gets [`QuantizationTier::Q3_K_M`].
pub const QUANTIZATION_LADDER: [(f64, QuantizationTier); 3] = [
    (20.0, QuantizationTier::Q5_K_M),
    (15.0, QuantizationTier::Q4_K_M),
    (10.0, QuantizationTier::Q4_K_S),
];

/// What a host can comfortably run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub max_model_size_gb: f64,
    pub gpu_offload_viable: bool,
    pub optimal_quantization: QuantizationTier,
}

#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    gpu_offload_min_vram_gb: f64,
    vram_safety_margin: f64,
    cpu_only_ram_fraction: f64,
}

impl RecommendationEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            gpu_offload_min_vram_gb: config.gpu_offload_min_vram_gb,
            vram_safety_margin: config.vram_safety_margin,
            cpu_only_ram_fraction: config.cpu_only_ram_fraction,
        }
    }

    pub fn recommend(&self, hardware: &HardwareProfile) -> Recommendation {
        let gpu_offload_viable = hardware.can_offload_to_gpu(self.gpu_offload_min_vram_gb);
        let max_model_size_gb = if gpu_offload_viable {
            hardware.available_vram_gb * self.vram_safety_margin
        } else {
            hardware.available_ram_gb * self.cpu_only_ram_fraction
        };
        let optimal_quantization = Self::tier_for(max_model_size_gb);

        debug!(
            max_model_size_gb,
            gpu_offload_viable,
            tier = %optimal_quantization,
            "Computed recommendation"
        );
        Recommendation {
            max_model_size_gb,
            gpu_offload_viable,
            optimal_quantization,
        }
    }

    /// Walk the ladder from the highest tier down.
    pub fn tier_for(max_model_size_gb: f64) -> QuantizationTier {
        QUANTIZATION_LADDER
            .iter()
            .find(|(min_gb, _)| max_model_size_gb >= *min_gb)
            .map(|(_, tier)| *tier)
            .unwrap_or(QuantizationTier::Q3_K_M)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn engine() -> RecommendationEngine {
        RecommendationEngine::new(&EngineConfig::default())
    }

    #[test]
    fn test_gpu_host() {
        let hw = HardwareProfile {
            total_vram_gb: 32.0,
            available_vram_gb: 25.0,
            available_ram_gb: 64.0,
            ..Default::default()
        };
        let rec = engine().recommend(&hw);
        assert!(rec.gpu_offload_viable);
        assert_relative_eq!(rec.max_model_size_gb, 20.0);
        assert_eq!(rec.optimal_quantization, QuantizationTier::Q5_K_M);
    }

    #[test]
    fn test_cpu_only_host() {
        let hw = HardwareProfile {
            total_vram_gb: 4.0,
            available_vram_gb: 4.0,
            available_ram_gb: 24.0,
            ..Default::default()
        };
        let rec = engine().recommend(&hw);
        assert!(!rec.gpu_offload_viable);
        assert_relative_eq!(rec.max_model_size_gb, 12.0);
        assert_eq!(rec.optimal_quantization, QuantizationTier::Q4_K_S);
    }

    #[test]
    fn test_ladder_boundaries() {
        assert_eq!(RecommendationEngine::tier_for(20.0), QuantizationTier::Q5_K_M);
        assert_eq!(RecommendationEngine::tier_for(19.99), QuantizationTier::Q4_K_M);
        assert_eq!(RecommendationEngine::tier_for(15.0), QuantizationTier::Q4_K_M);
        assert_eq!(RecommendationEngine::tier_for(10.0), QuantizationTier::Q4_K_S);
        assert_eq!(RecommendationEngine::tier_for(9.99), QuantizationTier::Q3_K_M);
        assert_eq!(RecommendationEngine::tier_for(0.0), QuantizationTier::Q3_K_M);
        assert_eq!(RecommendationEngine::tier_for(f64::NAN), QuantizationTier::Q3_K_M);
    }

    #[test]
    fn test_tier_names() {
        assert_eq!(QuantizationTier::Q4_K_M.to_string(), "Q4_K_M");
        assert_eq!(serde_json::to_string(&QuantizationTier::Q3_K_M).unwrap(), "\"Q3_K_M\"");
        assert_eq!(QuantizationTier::Q5_K_M.description(), "highest fidelity");
    }
}
