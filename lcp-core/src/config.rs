//! Engine configuration.
//!
//! Every tunable used by the placement engine lives here with a named
//! default. The margins and thresholds were chosen empirically; they carry no
//! meaning beyond "headroom that has worked in practice".

use thiserror::Error;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "LCP_";

/// Default width of the usage bar, in cells.
pub const DEFAULT_BAR_WIDTH: usize = 30;

/// Upper bound on the runtime buffer factor.
pub const MAX_RUNTIME_BUFFER_FACTOR: f64 = 4.0;

/// Upper bound on the fixed overhead, 1 TiB in MB.
pub const MAX_OVERHEAD_FLOOR_MB: u64 = 1024 * 1024;

/// Configuration shared by all engine components.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Fraction of available VRAM the allocator may assign.
    pub vram_safety_margin: f64,

    /// Fraction of available RAM the allocator may assign.
    pub ram_safety_margin: f64,

    /// Minimum total VRAM (GB) for GPU offload to be considered at all.
    pub gpu_offload_min_vram_gb: f64,

    /// Fraction of available RAM considered usable when recommending
    /// a model size for CPU-only hosts.
    pub cpu_only_ram_fraction: f64,

    /// VRAM (MB) held back for context and runtime buffers when planning layers.
    pub vram_reservation_mb: f64,

    /// Percentage of VRAM used by the maximize strategy.
    pub maximize_vram_percentage: u8,

    /// Percentage of VRAM used when callers do not specify one.
    pub default_vram_percentage: u8,

    /// Context length assumed when sizing the KV buffers.
    pub context_tokens: u64,

    /// Fixed overhead (MB) for activations and scratch buffers.
    pub overhead_floor_mb: u64,

    /// Multiplier applied to the file size to account for runtime buffers.
    pub runtime_buffer_factor: f64,

    /// Storage (GB) shown on the usage bar when the storage tier is enabled.
    pub storage_allowance_gb: f64,

    /// Tier utilization above which severity becomes `Warn`.
    pub severity_warn_ratio: f64,

    /// Tier utilization above which severity becomes `Critical`.
    pub severity_critical_ratio: f64,

    /// Usage bar width in cells.
    pub bar_width: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vram_safety_margin: 0.8,
            ram_safety_margin: 0.6,
            gpu_offload_min_vram_gb: 8.0,
            cpu_only_ram_fraction: 0.5,
            vram_reservation_mb: 512.0,
            maximize_vram_percentage: 90,
            default_vram_percentage: 80,
            context_tokens: 8192,
            overhead_floor_mb: 512,
            runtime_buffer_factor: 1.1,
            storage_allowance_gb: 50.0,
            severity_warn_ratio: 0.7,
            severity_critical_ratio: 0.9,
            bar_width: DEFAULT_BAR_WIDTH,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// Each field can be overridden with `LCP_<FIELD_NAME>` in upper case,
    /// e.g. `LCP_VRAM_SAFETY_MARGIN=0.75`. Unparseable values fall back to
    /// the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        Self {
            vram_safety_margin: parse_or(get("VRAM_SAFETY_MARGIN"), defaults.vram_safety_margin),
            ram_safety_margin: parse_or(get("RAM_SAFETY_MARGIN"), defaults.ram_safety_margin),
            gpu_offload_min_vram_gb: parse_or(
                get("GPU_OFFLOAD_MIN_VRAM_GB"),
                defaults.gpu_offload_min_vram_gb,
            ),
            cpu_only_ram_fraction: parse_or(
                get("CPU_ONLY_RAM_FRACTION"),
                defaults.cpu_only_ram_fraction,
            ),
            vram_reservation_mb: parse_or(get("VRAM_RESERVATION_MB"), defaults.vram_reservation_mb),
            maximize_vram_percentage: parse_or(
                get("MAXIMIZE_VRAM_PERCENTAGE"),
                defaults.maximize_vram_percentage,
            ),
            default_vram_percentage: parse_or(
                get("DEFAULT_VRAM_PERCENTAGE"),
                defaults.default_vram_percentage,
            ),
            context_tokens: parse_or(get("CONTEXT_TOKENS"), defaults.context_tokens),
            overhead_floor_mb: parse_or(get("OVERHEAD_FLOOR_MB"), defaults.overhead_floor_mb),
            runtime_buffer_factor: parse_or(
                get("RUNTIME_BUFFER_FACTOR"),
                defaults.runtime_buffer_factor,
            ),
            storage_allowance_gb: parse_or(
                get("STORAGE_ALLOWANCE_GB"),
                defaults.storage_allowance_gb,
            ),
            severity_warn_ratio: parse_or(get("SEVERITY_WARN_RATIO"), defaults.severity_warn_ratio),
            severity_critical_ratio: parse_or(
                get("SEVERITY_CRITICAL_RATIO"),
                defaults.severity_critical_ratio,
            ),
            bar_width: parse_or(get("BAR_WIDTH"), defaults.bar_width),
        }
    }

    /// Check that every field is within its meaningful range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_fraction("vram_safety_margin", self.vram_safety_margin)?;
        check_fraction("ram_safety_margin", self.ram_safety_margin)?;
        check_fraction("cpu_only_ram_fraction", self.cpu_only_ram_fraction)?;
        check_fraction("severity_warn_ratio", self.severity_warn_ratio)?;
        check_fraction("severity_critical_ratio", self.severity_critical_ratio)?;

        if self.severity_warn_ratio >= self.severity_critical_ratio {
            return Err(ConfigError::InvalidSeverityThresholds {
                warn: self.severity_warn_ratio,
                critical: self.severity_critical_ratio,
            });
        }
        for (name, value) in [
            ("maximize_vram_percentage", self.maximize_vram_percentage),
            ("default_vram_percentage", self.default_vram_percentage),
        ] {
            if value > 100 {
                return Err(ConfigError::PercentageOutOfRange { name, value });
            }
        }
        for (name, value) in [
            ("gpu_offload_min_vram_gb", self.gpu_offload_min_vram_gb),
            ("vram_reservation_mb", self.vram_reservation_mb),
            ("storage_allowance_gb", self.storage_allowance_gb),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeQuantity { name, value });
            }
        }
        if !(1.0..=MAX_RUNTIME_BUFFER_FACTOR).contains(&self.runtime_buffer_factor) {
            return Err(ConfigError::BufferFactorOutOfRange(self.runtime_buffer_factor));
        }
        if self.overhead_floor_mb > MAX_OVERHEAD_FLOOR_MB {
            return Err(ConfigError::OverheadTooLarge(self.overhead_floor_mb));
        }
        if self.context_tokens == 0 {
            return Err(ConfigError::ZeroContext);
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::FractionOutOfRange { name, value })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be in (0, 1], got {value}")]
    FractionOutOfRange { name: &'static str, value: f64 },

    #[error("severity warn ratio ({warn}) must be below critical ratio ({critical})")]
    InvalidSeverityThresholds { warn: f64, critical: f64 },

    #[error("{name} must be at most 100, got {value}")]
    PercentageOutOfRange { name: &'static str, value: u8 },

    #[error("{name} must be a non-negative number, got {value}")]
    NegativeQuantity { name: &'static str, value: f64 },

    #[error("runtime buffer factor must be in [1.0, {}], got {0}", MAX_RUNTIME_BUFFER_FACTOR)]
    BufferFactorOutOfRange(f64),

    #[error("overhead floor must be at most {} MB, got {0}", MAX_OVERHEAD_FLOOR_MB)]
    OverheadTooLarge(u64),

    #[error("context length must be greater than zero")]
    ZeroContext,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vram_safety_margin, 0.8);
        assert_eq!(config.ram_safety_margin, 0.6);
        assert_eq!(config.maximize_vram_percentage, 90);
        assert_eq!(config.default_vram_percentage, 80);
        assert_eq!(config.bar_width, 30);
    }

    #[test]
    fn test_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("LCP_VRAM_SAFETY_MARGIN", "0.75"),
            ("LCP_CONTEXT_TOKENS", "4096"),
            ("LCP_BAR_WIDTH", " 40 "),
        ]));
        assert_eq!(config.vram_safety_margin, 0.75);
        assert_eq!(config.context_tokens, 4096);
        assert_eq!(config.bar_width, 40);
        assert_eq!(config.ram_safety_margin, 0.6);
    }

    #[test]
    fn test_unparseable_override_falls_back() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("LCP_RAM_SAFETY_MARGIN", "sixty"),
            ("LCP_MAXIMIZE_VRAM_PERCENTAGE", "-5"),
        ]));
        assert_eq!(config.ram_safety_margin, 0.6);
        assert_eq!(config.maximize_vram_percentage, 90);
    }

    #[test]
    fn test_validate_rejects_bad_margin() {
        let config = EngineConfig {
            vram_safety_margin: 1.2,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::FractionOutOfRange {
                name: "vram_safety_margin",
                value: 1.2,
            })
        );

        let config = EngineConfig {
            ram_safety_margin: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let config = EngineConfig {
            severity_warn_ratio: 0.9,
            severity_critical_ratio: 0.7,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSeverityThresholds { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_percentage_and_context() {
        let config = EngineConfig {
            default_vram_percentage: 120,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::PercentageOutOfRange { .. })));

        let config = EngineConfig {
            context_tokens: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroContext));

        let config = EngineConfig {
            runtime_buffer_factor: 0.9,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::BufferFactorOutOfRange(0.9)));
    }

    #[test]
    fn test_validate_bounds_footprint_inputs() {
        let config =
            EngineConfig::from_lookup(lookup_from(&[("LCP_RUNTIME_BUFFER_FACTOR", "1e300")]));
        assert_eq!(config.validate(), Err(ConfigError::BufferFactorOutOfRange(1e300)));

        let config = EngineConfig {
            runtime_buffer_factor: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BufferFactorOutOfRange(_))));

        let config = EngineConfig {
            overhead_floor_mb: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::OverheadTooLarge(u64::MAX)));

        let config = EngineConfig {
            runtime_buffer_factor: MAX_RUNTIME_BUFFER_FACTOR,
            overhead_floor_mb: MAX_OVERHEAD_FLOOR_MB,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
