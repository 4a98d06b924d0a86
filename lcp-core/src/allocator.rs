//! Memory budget allocation across VRAM, RAM and storage
//!
//! Demand is poured into the fastest tier first. Each tier only accepts its
//! usable share (available memory times the safety margin); whatever is left
//! lands on storage. Running out of memory is reported through the storage
//! tier, never as an error.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::hardware::HardwareProfile;
use crate::metadata::ModelMetadata;

/// Memory tier, fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Vram,
    Ram,
    Storage,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Vram => write!(f, "VRAM"),
            Tier::Ram => write!(f, "RAM"),
            Tier::Storage => write!(f, "Storage"),
        }
    }
}

/// How close a tier is to its usable capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warn,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Ok => write!(f, "ok"),
            Severity::Warn => write!(f, "warn"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Share of demand placed on one tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierUsage {
    pub tier: Tier,
    pub assigned_gb: f64,
    /// Usable capacity after the safety margin; zero for storage
    pub capacity_gb: f64,
    pub severity: Severity,
}

impl TierUsage {
    /// Fraction of usable capacity assigned, when there is capacity
    pub fn utilization(&self) -> Option<f64> {
        (self.capacity_gb > 0.0).then(|| self.assigned_gb / self.capacity_gb)
    }
}

/// Placement of a memory demand across the three tiers.
///
/// `vram_gb + ram_gb + storage_gb == total_required_gb` up to float rounding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryBudget {
    pub vram_gb: f64,
    pub ram_gb: f64,
    pub storage_gb: f64,
    pub total_required_gb: f64,
    pub usable_vram_gb: f64,
    pub usable_ram_gb: f64,
    pub vram_severity: Severity,
    pub ram_severity: Severity,
    pub storage_severity: Severity,
}

impl MemoryBudget {
    /// True when nothing spills to storage
    pub fn feasible(&self) -> bool {
        self.storage_gb == 0.0
    }

    /// Per-tier view, fastest first
    pub fn tiers(&self) -> [TierUsage; 3] {
        [
            TierUsage {
                tier: Tier::Vram,
                assigned_gb: self.vram_gb,
                capacity_gb: self.usable_vram_gb,
                severity: self.vram_severity,
            },
            TierUsage {
                tier: Tier::Ram,
                assigned_gb: self.ram_gb,
                capacity_gb: self.usable_ram_gb,
                severity: self.ram_severity,
            },
            TierUsage {
                tier: Tier::Storage,
                assigned_gb: self.storage_gb,
                capacity_gb: 0.0,
                severity: self.storage_severity,
            },
        ]
    }

    /// Worst severity across tiers
    pub fn worst_severity(&self) -> Severity {
        self.vram_severity.max(self.ram_severity).max(self.storage_severity)
    }
}

/// Splits memory demand across tiers under safety margins
#[derive(Debug, Clone)]
pub struct MemoryBudgetAllocator {
    vram_safety_margin: f64,
    ram_safety_margin: f64,
    gpu_offload_min_vram_gb: f64,
    warn_ratio: f64,
    critical_ratio: f64,
}

impl MemoryBudgetAllocator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            vram_safety_margin: config.vram_safety_margin,
            ram_safety_margin: config.ram_safety_margin,
            gpu_offload_min_vram_gb: config.gpu_offload_min_vram_gb,
            warn_ratio: config.severity_warn_ratio,
            critical_ratio: config.severity_critical_ratio,
        }
    }

    /// Usable VRAM: zero when the host cannot offload
    pub fn usable_vram_gb(&self, hardware: &HardwareProfile) -> f64 {
        if hardware.can_offload_to_gpu(self.gpu_offload_min_vram_gb) {
            non_negative(hardware.available_vram_gb) * self.vram_safety_margin
        } else {
            0.0
        }
    }

    /// Usable RAM
    pub fn usable_ram_gb(&self, hardware: &HardwareProfile) -> f64 {
        non_negative(hardware.available_ram_gb) * self.ram_safety_margin
    }

    /// Budget for the full footprint of a model
    pub fn allocate(&self, metadata: &ModelMetadata, hardware: &HardwareProfile) -> MemoryBudget {
        self.allocate_demand(metadata.total_required_gb(), hardware)
    }

    /// Budget for a bare demand in GB. Negative or non-finite demand counts as 0.
    pub fn allocate_demand(&self, demand_gb: f64, hardware: &HardwareProfile) -> MemoryBudget {
        let demand_gb = non_negative(demand_gb);
        let usable_vram_gb = self.usable_vram_gb(hardware);
        let usable_ram_gb = self.usable_ram_gb(hardware);

        let vram_gb = demand_gb.min(usable_vram_gb);
        let ram_gb = (demand_gb - vram_gb).min(usable_ram_gb);
        let storage_gb = (demand_gb - vram_gb - ram_gb).max(0.0);

        let budget = MemoryBudget {
            vram_gb,
            ram_gb,
            storage_gb,
            total_required_gb: demand_gb,
            usable_vram_gb,
            usable_ram_gb,
            vram_severity: self.severity(vram_gb, usable_vram_gb),
            ram_severity: self.severity(ram_gb, usable_ram_gb),
            storage_severity: if storage_gb > 0.0 {
                Severity::Critical
            } else {
                Severity::Ok
            },
        };

        if budget.feasible() {
            debug!(vram_gb, ram_gb, demand_gb, "Demand fits in memory");
        } else {
            warn!(storage_gb, demand_gb, "Demand spills to storage");
        }
        budget
    }

    /// Severity of `assigned` against `capacity`
    pub fn severity(&self, assigned_gb: f64, capacity_gb: f64) -> Severity {
        if capacity_gb <= 0.0 {
            return if assigned_gb > 0.0 {
                Severity::Critical
            } else {
                Severity::Ok
            };
        }
        let ratio = assigned_gb / capacity_gb;
        if ratio <= self.warn_ratio {
            Severity::Ok
        } else if ratio <= self.critical_ratio {
            Severity::Warn
        } else {
            Severity::Critical
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn allocator() -> MemoryBudgetAllocator {
        MemoryBudgetAllocator::new(&EngineConfig::default())
    }

    fn host(total_vram: f64, available_vram: f64, available_ram: f64) -> HardwareProfile {
        HardwareProfile {
            system_ram_gb: available_ram * 2.0,
            available_ram_gb: available_ram,
            total_vram_gb: total_vram,
            available_vram_gb: available_vram,
            gpu_count: u32::from(total_vram > 0.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_fits_in_vram() {
        let budget = allocator().allocate_demand(6.0, &host(24.0, 20.0, 32.0));
        assert_relative_eq!(budget.usable_vram_gb, 16.0);
        assert_eq!(budget.vram_gb, 6.0);
        assert_eq!(budget.ram_gb, 0.0);
        assert_eq!(budget.storage_gb, 0.0);
        assert!(budget.feasible());
        assert_eq!(budget.vram_severity, Severity::Ok);
    }

    #[test]
    fn test_spills_vram_to_ram() {
        let budget = allocator().allocate_demand(10.0, &host(8.0, 5.0, 20.0));
        assert_relative_eq!(budget.vram_gb, 4.0);
        assert_relative_eq!(budget.ram_gb, 6.0);
        assert_eq!(budget.storage_gb, 0.0);
        assert_eq!(budget.vram_severity, Severity::Critical);
        assert_eq!(budget.ram_severity, Severity::Ok);
    }

    #[test]
    fn test_small_gpu_is_skipped() {
        // 4 GB card: not worth offloading, demand goes to RAM then storage
        let budget = allocator().allocate_demand(12.0, &host(4.0, 4.0, 10.0));
        assert_eq!(budget.usable_vram_gb, 0.0);
        assert_eq!(budget.vram_gb, 0.0);
        assert_relative_eq!(budget.ram_gb, 6.0);
        assert_relative_eq!(budget.storage_gb, 6.0);
        assert!(!budget.feasible());
        assert_eq!(budget.vram_severity, Severity::Ok);
        assert_eq!(budget.ram_severity, Severity::Critical);
        assert_eq!(budget.storage_severity, Severity::Critical);
        assert_eq!(budget.worst_severity(), Severity::Critical);
    }

    #[test]
    fn test_no_memory_at_all() {
        let budget = allocator().allocate_demand(3.0, &host(0.0, 0.0, 0.0));
        assert_eq!(budget.storage_gb, 3.0);
        assert_eq!(budget.total_required_gb, 3.0);
    }

    #[test]
    fn test_invalid_demand_is_zero() {
        for demand in [-1.0, f64::NAN, f64::NEG_INFINITY] {
            let budget = allocator().allocate_demand(demand, &host(12.0, 10.0, 16.0));
            assert_eq!(budget.total_required_gb, 0.0);
            assert!(budget.feasible());
        }
    }

    #[test]
    fn test_severity_thresholds() {
        let a = allocator();
        assert_eq!(a.severity(0.0, 10.0), Severity::Ok);
        assert_eq!(a.severity(7.0, 10.0), Severity::Ok);
        assert_eq!(a.severity(8.0, 10.0), Severity::Warn);
        assert_eq!(a.severity(9.0, 10.0), Severity::Warn);
        assert_eq!(a.severity(9.5, 10.0), Severity::Critical);
        assert_eq!(a.severity(0.0, 0.0), Severity::Ok);
        assert_eq!(a.severity(1.0, 0.0), Severity::Critical);
    }

    #[test]
    fn test_tiers_view() {
        let budget = allocator().allocate_demand(10.0, &host(8.0, 5.0, 20.0));
        let tiers = budget.tiers();
        assert_eq!(tiers.map(|t| t.tier), [Tier::Vram, Tier::Ram, Tier::Storage]);
        assert_relative_eq!(tiers[0].utilization().unwrap(), 1.0);
        assert_eq!(tiers[2].utilization(), None);
    }

    #[test]
    fn test_custom_margins() {
        let config = EngineConfig {
            vram_safety_margin: 0.5,
            ram_safety_margin: 0.5,
            ..Default::default()
        };
        let budget =
            MemoryBudgetAllocator::new(&config).allocate_demand(10.0, &host(12.0, 10.0, 4.0));
        assert_relative_eq!(budget.vram_gb, 5.0);
        assert_relative_eq!(budget.ram_gb, 2.0);
        assert_relative_eq!(budget.storage_gb, 3.0);
    }
}
