//! GPU layer planning
//!
//! Turns a named placement strategy into the number of layers the runtime
//! should offload to the GPU. The result is forwarded verbatim into launch
//! parameters, including the [`ALL_LAYERS`] sentinel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::PlacementError;
use crate::hardware::HardwareProfile;
use crate::metadata::ModelMetadata;

/// Runtime convention for "offload every layer"; the runtime caps it at the
/// model's real layer count.
pub const ALL_LAYERS: u32 = 999;

/// How layers should be split between GPU and CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "percentage")]
pub enum PlacementStrategy {
    /// Every layer on the GPU, whether or not it fits
    ForceGpu,
    /// No layers on the GPU
    ForceCpu,
    /// As many layers as fit in the configured maximize share of VRAM
    MaximizeGpu,
    /// As many layers as fit in the given percentage of available VRAM.
    /// Values above 100 are treated as 100.
    PercentageOfVram(u8),
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementStrategy::ForceGpu => write!(f, "gpu-only"),
            PlacementStrategy::ForceCpu => write!(f, "cpu-only"),
            PlacementStrategy::MaximizeGpu => write!(f, "auto-maximize"),
            PlacementStrategy::PercentageOfVram(pct) => write!(f, "auto-percentage ({pct}%)"),
        }
    }
}

/// Strategy names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    GpuOnly,
    CpuOnly,
    #[default]
    AutoMaximize,
    AutoPercentage,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::GpuOnly,
        StrategyKind::CpuOnly,
        StrategyKind::AutoMaximize,
        StrategyKind::AutoPercentage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::GpuOnly => "gpu-only",
            StrategyKind::CpuOnly => "cpu-only",
            StrategyKind::AutoMaximize => "auto-maximize",
            StrategyKind::AutoPercentage => "auto-percentage",
        }
    }

    /// Resolve into a strategy; `vram_percentage` only applies to `auto-percentage`.
    pub fn with_percentage(self, vram_percentage: u8) -> PlacementStrategy {
        match self {
            StrategyKind::GpuOnly => PlacementStrategy::ForceGpu,
            StrategyKind::CpuOnly => PlacementStrategy::ForceCpu,
            StrategyKind::AutoMaximize => PlacementStrategy::MaximizeGpu,
            StrategyKind::AutoPercentage => PlacementStrategy::PercentageOfVram(vram_percentage),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let valid: Vec<&str> = StrategyKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown strategy '{}', expected one of: {}", s, valid.join(", "))
            })
    }
}

/// Computes GPU layer counts for a strategy
#[derive(Debug, Clone)]
pub struct LayerPlanner {
    gpu_offload_min_vram_gb: f64,
    vram_reservation_mb: f64,
    maximize_vram_percentage: u8,
}

impl LayerPlanner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            gpu_offload_min_vram_gb: config.gpu_offload_min_vram_gb,
            vram_reservation_mb: config.vram_reservation_mb,
            maximize_vram_percentage: config.maximize_vram_percentage,
        }
    }

    /// Number of layers to offload.
    ///
    /// `vram_pct_override` replaces the percentage carried by
    /// [`PlacementStrategy::PercentageOfVram`]; other strategies ignore it.
    /// Percentage strategies fail with [`PlacementError::DivisionUndefined`]
    /// when the per-layer size is zero and yield 0 on hosts that cannot offload.
    pub fn plan_layers(
        &self,
        strategy: PlacementStrategy,
        metadata: &ModelMetadata,
        hardware: &HardwareProfile,
        vram_pct_override: Option<u8>,
    ) -> Result<u32, PlacementError> {
        let percentage = match strategy {
            PlacementStrategy::ForceGpu => return Ok(ALL_LAYERS),
            PlacementStrategy::ForceCpu => return Ok(0),
            PlacementStrategy::MaximizeGpu => self.maximize_vram_percentage,
            PlacementStrategy::PercentageOfVram(pct) => vram_pct_override.unwrap_or(pct),
        };
        self.layers_for_percentage(percentage, metadata, hardware)
    }

    fn layers_for_percentage(
        &self,
        percentage: u8,
        metadata: &ModelMetadata,
        hardware: &HardwareProfile,
    ) -> Result<u32, PlacementError> {
        let memory_per_layer_mb = metadata.memory_per_layer_mb();
        if metadata.estimated_layers == 0 || !(memory_per_layer_mb > 0.0) {
            return Err(PlacementError::DivisionUndefined {
                estimated_layers: metadata.estimated_layers,
                memory_per_layer_mb,
            });
        }

        if !hardware.can_offload_to_gpu(self.gpu_offload_min_vram_gb) {
            debug!(total_vram_gb = hardware.total_vram_gb, "GPU too small, no layers offloaded");
            return Ok(0);
        }

        let percentage = f64::from(percentage.min(100));
        let available_mb = hardware.available_vram_mb();
        let available_mb = if available_mb.is_finite() {
            available_mb.max(0.0)
        } else {
            0.0
        };
        let usable_mb = available_mb * percentage / 100.0 - self.vram_reservation_mb;

        let fitting = (usable_mb / memory_per_layer_mb).floor();
        let layers = fitting.clamp(0.0, f64::from(metadata.estimated_layers)) as u32;

        debug!(
            percentage,
            usable_mb,
            memory_per_layer_mb,
            layers,
            total_layers = metadata.estimated_layers,
            "Planned GPU layers"
        );
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ModelMetadataEstimator;

    fn planner() -> LayerPlanner {
        LayerPlanner::new(&EngineConfig::default())
    }

    fn gpu_host(total_vram: f64, available_vram: f64) -> HardwareProfile {
        HardwareProfile {
            system_ram_gb: 32.0,
            available_ram_gb: 24.0,
            gpu_count: 1,
            gpu_models: vec!["test gpu".to_string()],
            total_vram_gb: total_vram,
            available_vram_gb: available_vram,
            ..Default::default()
        }
    }

    fn metadata(size_gb: f64) -> ModelMetadata {
        ModelMetadataEstimator::new(&EngineConfig::default()).estimate_from_size(size_gb)
    }

    #[test]
    fn test_force_strategies() {
        let m = metadata(4.0);
        let hw = gpu_host(0.0, 0.0);
        let planner = planner();
        assert_eq!(
            planner.plan_layers(PlacementStrategy::ForceGpu, &m, &hw, None),
            Ok(ALL_LAYERS)
        );
        assert_eq!(planner.plan_layers(PlacementStrategy::ForceCpu, &m, &hw, None), Ok(0));
    }

    #[test]
    fn test_percentage_split() {
        // 13 GB band: 40 layers, 14643 MB of weights, ~366 MB per layer
        let m = metadata(13.0);
        let hw = gpu_host(12.0, 10.0);
        // 10240 * 0.8 - 512 = 7680 MB -> 20 layers
        let layers = planner().plan_layers(PlacementStrategy::PercentageOfVram(80), &m, &hw, None);
        assert_eq!(layers, Ok(20));
    }

    #[test]
    fn test_percentage_capped_at_layer_count() {
        let m = metadata(4.0);
        let hw = gpu_host(24.0, 24.0);
        let layers = planner().plan_layers(PlacementStrategy::PercentageOfVram(100), &m, &hw, None);
        assert_eq!(layers, Ok(32));
    }

    #[test]
    fn test_zero_percentage() {
        let m = metadata(4.0);
        let hw = gpu_host(24.0, 24.0);
        let layers = planner().plan_layers(PlacementStrategy::PercentageOfVram(0), &m, &hw, None);
        assert_eq!(layers, Ok(0));
    }

    #[test]
    fn test_percentage_clamped_to_100() {
        let m = metadata(13.0);
        let hw = gpu_host(12.0, 10.0);
        let p = planner();
        assert_eq!(
            p.plan_layers(PlacementStrategy::PercentageOfVram(250), &m, &hw, None),
            p.plan_layers(PlacementStrategy::PercentageOfVram(100), &m, &hw, None)
        );
    }

    #[test]
    fn test_maximize_equals_ninety_percent() {
        let hw = gpu_host(12.0, 11.0);
        let p = planner();
        for size in [1.0, 4.0, 7.5, 13.0, 20.0, 40.0] {
            let m = metadata(size);
            assert_eq!(
                p.plan_layers(PlacementStrategy::MaximizeGpu, &m, &hw, None),
                p.plan_layers(PlacementStrategy::PercentageOfVram(90), &m, &hw, None),
                "size {size}"
            );
        }
    }

    #[test]
    fn test_override_only_applies_to_percentage() {
        let m = metadata(13.0);
        let hw = gpu_host(12.0, 10.0);
        let p = planner();
        assert_eq!(
            p.plan_layers(PlacementStrategy::PercentageOfVram(80), &m, &hw, Some(0)),
            Ok(0)
        );
        assert_eq!(
            p.plan_layers(PlacementStrategy::MaximizeGpu, &m, &hw, Some(0)),
            p.plan_layers(PlacementStrategy::MaximizeGpu, &m, &hw, None)
        );
        assert_eq!(p.plan_layers(PlacementStrategy::ForceGpu, &m, &hw, Some(0)), Ok(ALL_LAYERS));
    }

    #[test]
    fn test_small_gpu_yields_zero() {
        let m = metadata(4.0);
        let hw = gpu_host(6.0, 6.0);
        let p = planner();
        assert_eq!(p.plan_layers(PlacementStrategy::MaximizeGpu, &m, &hw, None), Ok(0));
        assert_eq!(p.plan_layers(PlacementStrategy::PercentageOfVram(100), &m, &hw, None), Ok(0));
    }

    #[test]
    fn test_zero_layer_size_is_undefined() {
        let m = metadata(0.0);
        let hw = gpu_host(24.0, 24.0);
        let err = planner()
            .plan_layers(PlacementStrategy::PercentageOfVram(80), &m, &hw, None)
            .unwrap_err();
        assert_eq!(
            err,
            PlacementError::DivisionUndefined {
                estimated_layers: 22,
                memory_per_layer_mb: 0.0,
            }
        );

        // Fixed strategies never divide
        assert_eq!(planner().plan_layers(PlacementStrategy::ForceCpu, &m, &hw, None), Ok(0));
    }

    #[test]
    fn test_zero_layers_is_undefined() {
        let mut m = metadata(4.0);
        m.estimated_layers = 0;
        let hw = gpu_host(24.0, 24.0);
        assert!(matches!(
            planner().plan_layers(PlacementStrategy::MaximizeGpu, &m, &hw, None),
            Err(PlacementError::DivisionUndefined { estimated_layers: 0, .. })
        ));
    }

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!("gpu-only".parse::<StrategyKind>(), Ok(StrategyKind::GpuOnly));
        assert_eq!("CPU-ONLY".parse::<StrategyKind>(), Ok(StrategyKind::CpuOnly));
        assert_eq!(" auto-maximize ".parse::<StrategyKind>(), Ok(StrategyKind::AutoMaximize));
        assert_eq!("auto-percentage".parse::<StrategyKind>(), Ok(StrategyKind::AutoPercentage));
        assert!("fastest".parse::<StrategyKind>().unwrap_err().contains("gpu-only"));

        for kind in StrategyKind::ALL {
            assert_eq!(kind.to_string().parse::<StrategyKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_strategy_kind_resolution() {
        assert_eq!(
            StrategyKind::AutoPercentage.with_percentage(65),
            PlacementStrategy::PercentageOfVram(65)
        );
        assert_eq!(StrategyKind::AutoMaximize.with_percentage(65), PlacementStrategy::MaximizeGpu);
        assert_eq!(StrategyKind::GpuOnly.with_percentage(65), PlacementStrategy::ForceGpu);
        assert_eq!(StrategyKind::CpuOnly.with_percentage(65), PlacementStrategy::ForceCpu);
    }
}
