//! Placement engine facade
//!
//! Runs the full data flow for one artifact: estimate the footprint, split it
//! across memory tiers, plan GPU layers, recommend a quantization tier and
//! render the usage bar. Every component is an immutable value built from the
//! same [`EngineConfig`], so a single engine can be shared across threads.

use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::allocator::{MemoryBudget, MemoryBudgetAllocator};
use crate::config::{ConfigError, EngineConfig};
use crate::error::PlacementError;
use crate::hardware::HardwareProfile;
use crate::metadata::{ModelMetadata, ModelMetadataEstimator};
use crate::optimizer::{LaunchOptimizer, LaunchParameters};
use crate::planner::{LayerPlanner, PlacementStrategy};
use crate::recommend::{Recommendation, RecommendationEngine};
use crate::visualizer::{UsageBar, UsageVisualizer};

/// Everything decided for one artifact on one host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementPlan {
    pub metadata: ModelMetadata,
    pub strategy: PlacementStrategy,
    pub budget: MemoryBudget,
    pub gpu_layers: u32,
    pub recommendation: Recommendation,
    pub bar: UsageBar,
}

/// Bundles the placement components under one configuration
#[derive(Debug, Clone)]
pub struct PlacementEngine {
    config: EngineConfig,
    estimator: ModelMetadataEstimator,
    allocator: MemoryBudgetAllocator,
    planner: LayerPlanner,
    recommender: RecommendationEngine,
    visualizer: UsageVisualizer,
    launcher: LaunchOptimizer,
    include_storage_tier: bool,
}

impl Default for PlacementEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl PlacementEngine {
    /// Build an engine without validating the configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            estimator: ModelMetadataEstimator::new(&config),
            allocator: MemoryBudgetAllocator::new(&config),
            planner: LayerPlanner::new(&config),
            recommender: RecommendationEngine::new(&config),
            visualizer: UsageVisualizer::new(&config),
            launcher: LaunchOptimizer::new(&config),
            include_storage_tier: false,
            config,
        }
    }

    /// Build an engine after validating the configuration
    pub fn try_new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Show the storage allowance as a third tier on the usage bar
    pub fn with_storage_tier(mut self, include: bool) -> Self {
        self.include_storage_tier = include;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn estimator(&self) -> &ModelMetadataEstimator {
        &self.estimator
    }

    pub fn allocator(&self) -> &MemoryBudgetAllocator {
        &self.allocator
    }

    pub fn planner(&self) -> &LayerPlanner {
        &self.planner
    }

    pub fn recommender(&self) -> &RecommendationEngine {
        &self.recommender
    }

    pub fn visualizer(&self) -> &UsageVisualizer {
        &self.visualizer
    }

    /// Plan placement for the artifact at `path`
    pub fn plan(
        &self,
        path: &Path,
        strategy: PlacementStrategy,
        vram_pct_override: Option<u8>,
        hardware: &HardwareProfile,
    ) -> Result<PlacementPlan, PlacementError> {
        let metadata = self.estimator.estimate(path)?;
        let plan = self.plan_for_metadata(metadata, strategy, vram_pct_override, hardware)?;
        info!(
            path = %path.display(),
            strategy = %strategy,
            gpu_layers = plan.gpu_layers,
            feasible = plan.budget.feasible(),
            "Planned placement"
        );
        Ok(plan)
    }

    /// Plan placement for an artifact known only by its size
    pub fn plan_for_size(
        &self,
        file_size_gb: f64,
        strategy: PlacementStrategy,
        vram_pct_override: Option<u8>,
        hardware: &HardwareProfile,
    ) -> Result<PlacementPlan, PlacementError> {
        let metadata = self.estimator.estimate_from_size(file_size_gb);
        self.plan_for_metadata(metadata, strategy, vram_pct_override, hardware)
    }

    /// Plan placement from already estimated metadata
    pub fn plan_for_metadata(
        &self,
        metadata: ModelMetadata,
        strategy: PlacementStrategy,
        vram_pct_override: Option<u8>,
        hardware: &HardwareProfile,
    ) -> Result<PlacementPlan, PlacementError> {
        let gpu_layers = self
            .planner
            .plan_layers(strategy, &metadata, hardware, vram_pct_override)?;
        let budget = self.allocator.allocate(&metadata, hardware);
        let recommendation = self.recommender.recommend(hardware);
        let bar = self.visualizer.render_budget(
            &budget,
            self.config.bar_width,
            self.include_storage_tier,
        );

        Ok(PlacementPlan {
            metadata,
            strategy,
            budget,
            gpu_layers,
            recommendation,
            bar,
        })
    }

    /// Server launch parameters for a plan
    pub fn launch_parameters(
        &self,
        plan: &PlacementPlan,
        hardware: &HardwareProfile,
    ) -> LaunchParameters {
        self.launcher.optimize(plan, hardware)
    }
}
