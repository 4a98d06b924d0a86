// lcp Core Library
//
// Hardware-aware placement of quantized GGUF models across VRAM, RAM and storage

pub mod allocator;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod gguf;
pub mod hardware;
pub mod metadata;
pub mod optimizer;
pub mod parser;
pub mod planner;
pub mod recommend;
pub mod visualizer;

pub use allocator::{MemoryBudget, MemoryBudgetAllocator, Severity, Tier, TierUsage};
pub use config::{ConfigError, EngineConfig};
pub use engine::{PlacementEngine, PlacementPlan};
pub use error::{HardwareError, PlacementError};
pub use hardware::{HardwareProfile, StorageKind};
pub use metadata::{HeaderDivergence, ModelMetadata, ModelMetadataEstimator};
pub use optimizer::{apply_gpu_layers, LaunchOptimizer, LaunchParameters};
pub use planner::{LayerPlanner, PlacementStrategy, StrategyKind, ALL_LAYERS};
pub use recommend::{QuantizationTier, Recommendation, RecommendationEngine};
pub use visualizer::{BarState, Cell, UsageBar, UsageVisualizer};
