//! Fixed-width usage bar
//!
//! The bar is one shared scale: every cell stands for the same number of GB
//! out of the usable pool (usable VRAM + usable RAM + an optional storage
//! allowance). Each tier gets cells proportional to its capacity, and the
//! cells covered by the model's budget are marked used with the tier's
//! severity. Painting is left to the caller.

use serde::Serialize;

use crate::allocator::{MemoryBudget, MemoryBudgetAllocator, Severity, Tier};
use crate::config::EngineConfig;
use crate::hardware::HardwareProfile;
use crate::metadata::ModelMetadata;

/// Shown when the pool is empty
pub const NO_MEMORY_MESSAGE: &str = "No memory available";

/// Shown when demand exceeds the pool
pub const INSUFFICIENT_MESSAGE: &str = "Insufficient RAM";

/// One character position of the bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "cell")]
pub enum Cell {
    /// Capacity occupied by the model
    Used { tier: Tier, severity: Severity },
    /// Capacity left free
    Free { tier: Tier },
    /// Padding after the last tier
    Filler,
    /// One character of a fallback message
    Message { ch: char },
}

impl Cell {
    /// Character used when the bar is printed without colour
    pub fn glyph(&self) -> char {
        match self {
            Cell::Used { .. } => '█',
            Cell::Free { .. } => '░',
            Cell::Filler => '·',
            Cell::Message { ch } => *ch,
        }
    }
}

/// How the bar was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BarState {
    Proportional,
    Insufficient,
    NoCapacity,
}

/// Rendered bar, always exactly the requested width
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageBar {
    pub state: BarState,
    pub cells: Vec<Cell>,
}

impl UsageBar {
    pub fn width(&self) -> usize {
        self.cells.len()
    }

    /// Uncoloured rendering, one char per cell
    pub fn plain_text(&self) -> String {
        self.cells.iter().map(Cell::glyph).collect()
    }

    fn message(state: BarState, text: &str, width: usize) -> Self {
        let cells = text
            .chars()
            .map(|ch| Cell::Message { ch })
            .chain(std::iter::repeat(Cell::Message { ch: ' ' }))
            .take(width)
            .collect();
        Self { state, cells }
    }
}

/// Renders budgets into [`UsageBar`]s
#[derive(Debug, Clone)]
pub struct UsageVisualizer {
    allocator: MemoryBudgetAllocator,
    storage_allowance_gb: f64,
}

impl UsageVisualizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            allocator: MemoryBudgetAllocator::new(config),
            storage_allowance_gb: config.storage_allowance_gb,
        }
    }

    /// Bar for the full footprint of a model
    pub fn render(
        &self,
        metadata: &ModelMetadata,
        hardware: &HardwareProfile,
        width: usize,
        include_storage_tier: bool,
    ) -> UsageBar {
        let budget = self.allocator.allocate(metadata, hardware);
        self.render_budget(&budget, width, include_storage_tier)
    }

    /// Bar for a bare demand in GB
    pub fn render_demand(
        &self,
        demand_gb: f64,
        hardware: &HardwareProfile,
        width: usize,
        include_storage_tier: bool,
    ) -> UsageBar {
        let budget = self.allocator.allocate_demand(demand_gb, hardware);
        self.render_budget(&budget, width, include_storage_tier)
    }

    /// Bar for an existing budget
    pub fn render_budget(
        &self,
        budget: &MemoryBudget,
        width: usize,
        include_storage_tier: bool,
    ) -> UsageBar {
        let storage_gb = if include_storage_tier {
            self.storage_allowance_gb
        } else {
            0.0
        };
        let pool_gb = budget.usable_vram_gb + budget.usable_ram_gb + storage_gb;

        if !(pool_gb > 0.0) {
            return UsageBar::message(BarState::NoCapacity, NO_MEMORY_MESSAGE, width);
        }
        if budget.total_required_gb > pool_gb {
            return UsageBar::message(BarState::Insufficient, INSUFFICIENT_MESSAGE, width);
        }

        let gb_per_cell = pool_gb / width.max(1) as f64;
        let cells_for = |gb: f64| (gb / gb_per_cell).floor() as usize;

        let mut sections = vec![
            (Tier::Vram, budget.usable_vram_gb, budget.vram_gb, budget.vram_severity),
            (Tier::Ram, budget.usable_ram_gb, budget.ram_gb, budget.ram_severity),
        ];
        if include_storage_tier {
            sections.push((Tier::Storage, storage_gb, budget.storage_gb, budget.storage_severity));
        }

        let mut cells = Vec::with_capacity(width);
        for (tier, capacity_gb, assigned_gb, severity) in sections {
            let total = cells_for(capacity_gb);
            let used = cells_for(assigned_gb).min(total);
            cells.extend(std::iter::repeat(Cell::Used { tier, severity }).take(used));
            cells.extend(std::iter::repeat(Cell::Free { tier }).take(total - used));
        }
        cells.resize(width, Cell::Filler);

        UsageBar {
            state: BarState::Proportional,
            cells,
        }
    }
}
