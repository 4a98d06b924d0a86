//! Property tests for the placement engine
//!
//! Hardware profiles are generated so that available memory never exceeds
//! the total, matching what the host probe produces.

use lcp_core::{
    EngineConfig, HardwareProfile, LayerPlanner, MemoryBudgetAllocator, ModelMetadataEstimator,
    PlacementStrategy, RecommendationEngine, UsageVisualizer,
};
use proptest::prelude::*;

fn hardware() -> impl Strategy<Value = HardwareProfile> {
    (0.0f64..48.0, 0.0f64..=1.0, 0.5f64..256.0, 0.0f64..=1.0).prop_map(
        |(total_vram, vram_frac, system_ram, ram_frac)| HardwareProfile {
            cpu_cores: 8,
            cpu_threads: 16,
            system_ram_gb: system_ram,
            available_ram_gb: system_ram * ram_frac,
            gpu_count: u32::from(total_vram > 0.0),
            total_vram_gb: total_vram,
            available_vram_gb: total_vram * vram_frac,
            ..Default::default()
        },
    )
}

fn small_gpu_hardware() -> impl Strategy<Value = HardwareProfile> {
    (hardware(), 0.0f64..8.0).prop_map(|(mut hw, total_vram)| {
        hw.total_vram_gb = total_vram;
        hw.available_vram_gb = total_vram;
        hw
    })
}

fn config() -> EngineConfig {
    EngineConfig::default()
}

proptest! {
    #[test]
    fn prop_small_gpu_never_offloads(
        hw in small_gpu_hardware(),
        size_gb in 0.1f64..120.0,
        pct in 0u8..=100,
    ) {
        let config = config();
        let metadata = ModelMetadataEstimator::new(&config).estimate_from_size(size_gb);
        let planner = LayerPlanner::new(&config);

        prop_assert!(!RecommendationEngine::new(&config).recommend(&hw).gpu_offload_viable);
        prop_assert_eq!(
            planner.plan_layers(PlacementStrategy::MaximizeGpu, &metadata, &hw, None),
            Ok(0)
        );
        prop_assert_eq!(
            planner.plan_layers(PlacementStrategy::PercentageOfVram(pct), &metadata, &hw, None),
            Ok(0)
        );
        prop_assert_eq!(MemoryBudgetAllocator::new(&config).allocate(&metadata, &hw).vram_gb, 0.0);
    }

    #[test]
    fn prop_budget_conserves_demand(hw in hardware(), demand in 0.0f64..500.0) {
        let budget = MemoryBudgetAllocator::new(&config()).allocate_demand(demand, &hw);

        prop_assert!(budget.vram_gb >= 0.0);
        prop_assert!(budget.ram_gb >= 0.0);
        prop_assert!(budget.storage_gb >= 0.0);
        prop_assert!(budget.vram_gb <= budget.usable_vram_gb);
        prop_assert!(budget.ram_gb <= budget.usable_ram_gb);

        let placed = budget.vram_gb + budget.ram_gb + budget.storage_gb;
        prop_assert!((placed - demand).abs() <= 1e-9 * demand.max(1.0));
        prop_assert_eq!(budget.feasible(), budget.storage_gb == 0.0);
    }

    #[test]
    fn prop_allocate_is_idempotent(hw in hardware(), size_gb in 0.0f64..120.0) {
        let config = config();
        let metadata = ModelMetadataEstimator::new(&config).estimate_from_size(size_gb);
        let allocator = MemoryBudgetAllocator::new(&config);

        prop_assert_eq!(allocator.allocate(&metadata, &hw), allocator.allocate(&metadata, &hw));
    }

    #[test]
    fn prop_percentage_bounds(hw in hardware(), size_gb in 0.1f64..120.0) {
        let config = config();
        let metadata = ModelMetadataEstimator::new(&config).estimate_from_size(size_gb);
        let planner = LayerPlanner::new(&config);

        prop_assert_eq!(
            planner.plan_layers(PlacementStrategy::PercentageOfVram(0), &metadata, &hw, None),
            Ok(0)
        );
        let full = planner
            .plan_layers(PlacementStrategy::PercentageOfVram(100), &metadata, &hw, None)
            .unwrap();
        prop_assert!(full <= metadata.estimated_layers);
    }

    #[test]
    fn prop_layers_grow_with_percentage(
        hw in hardware(),
        size_gb in 0.1f64..120.0,
        a in 0u8..=100,
        b in 0u8..=100,
    ) {
        let config = config();
        let metadata = ModelMetadataEstimator::new(&config).estimate_from_size(size_gb);
        let planner = LayerPlanner::new(&config);
        let (low, high) = (a.min(b), a.max(b));

        let low_layers = planner
            .plan_layers(PlacementStrategy::PercentageOfVram(low), &metadata, &hw, None)
            .unwrap();
        let high_layers = planner
            .plan_layers(PlacementStrategy::PercentageOfVram(high), &metadata, &hw, None)
            .unwrap();
        prop_assert!(low_layers <= high_layers);
    }

    #[test]
    fn prop_maximize_is_ninety_percent(hw in hardware(), size_gb in 0.1f64..120.0) {
        let config = config();
        let metadata = ModelMetadataEstimator::new(&config).estimate_from_size(size_gb);
        let planner = LayerPlanner::new(&config);

        prop_assert_eq!(
            planner.plan_layers(PlacementStrategy::MaximizeGpu, &metadata, &hw, None),
            planner.plan_layers(PlacementStrategy::PercentageOfVram(90), &metadata, &hw, None)
        );
    }

    #[test]
    fn prop_render_has_exact_width(
        hw in hardware(),
        size_gb in 0.0f64..200.0,
        width in 0usize..120,
        include_storage in any::<bool>(),
    ) {
        let config = config();
        let metadata = ModelMetadataEstimator::new(&config).estimate_from_size(size_gb);
        let bar = UsageVisualizer::new(&config).render(&metadata, &hw, width, include_storage);

        prop_assert_eq!(bar.cells.len(), width);
        prop_assert_eq!(bar.plain_text().chars().count(), width);
    }
}
