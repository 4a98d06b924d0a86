use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use lcp_core::{
    apply_gpu_layers, Cell, EngineConfig, HardwareProfile, MemoryBudget, PlacementEngine,
    PlacementPlan, Recommendation, Severity, StrategyKind, Tier, UsageBar, ALL_LAYERS,
};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "lcp")]
#[command(version)]
#[command(about = "lcp - hardware-aware placement for local GGUF models", long_about = None)]
struct Cli {
    /// Disable coloured output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Profile this host and print recommendations
    Detect {
        /// Directory whose disk is reported as model storage (default: home)
        #[arg(long)]
        storage_path: Option<PathBuf>,

        /// Write the profile as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Recommend a model size and quantization tier
    Recommend {
        /// Use a saved profile instead of probing the host
        #[arg(long)]
        profile: Option<PathBuf>,
    },

    /// Plan layer placement for a model file
    Plan {
        /// Path to the GGUF model
        model: PathBuf,

        /// Placement strategy
        #[arg(short, long, default_value_t = StrategyKind::AutoMaximize)]
        strategy: StrategyKind,

        /// Percentage of available VRAM for auto-percentage
        /// (default from LCP_DEFAULT_VRAM_PERCENTAGE)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        vram_percentage: Option<u8>,

        /// Use a saved profile instead of probing the host
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Usage bar width in cells
        #[arg(long)]
        width: Option<usize>,

        /// Include the storage allowance as a third tier
        #[arg(long)]
        storage: bool,

        /// Print the plan and launch parameters as JSON only
        #[arg(long)]
        json: bool,

        /// Launch command line to rewrite with the planned -ngl value
        #[arg(long)]
        command: Option<String>,
    },

    /// Show usage bars for bare model sizes
    Fit {
        /// Model sizes in GB
        #[arg(required = true)]
        sizes: Vec<f64>,

        /// Use a saved profile instead of probing the host
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Usage bar width in cells
        #[arg(long)]
        width: Option<usize>,

        /// Include the storage allowance as a third tier
        #[arg(long)]
        storage: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lcp=info,lcp_core=warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = EngineConfig::from_env();
    config.validate().context("Invalid LCP_* configuration")?;
    debug!(?config, "Loaded engine configuration");

    match cli.command {
        Commands::Detect {
            storage_path,
            output,
        } => {
            println!("🔍 Profiling hardware...\n");

            let hw = HardwareProfile::detect(storage_path.as_deref())
                .context("Failed to profile hardware")?;
            let engine = PlacementEngine::new(config);

            print_hardware(&hw);
            print_recommendation(&engine.recommender().recommend(&hw));

            let json = serde_json::to_string_pretty(&hw)?;
            if let Some(path) = output {
                fs::write(&path, &json)
                    .with_context(|| format!("Failed to write profile to {}", path.display()))?;
                info!(path = %path.display(), "Saved hardware profile");
                println!("✅ Profile saved to: {}\n", path.display());
            }

            println!("=== JSON Output ===");
            println!("{}", json);
        }

        Commands::Recommend { profile } => {
            let hw = load_profile(profile.as_deref())?;
            let engine = PlacementEngine::new(config);

            print_hardware(&hw);
            print_recommendation(&engine.recommender().recommend(&hw));
        }

        Commands::Plan {
            model,
            strategy,
            vram_percentage,
            profile,
            width,
            storage,
            json,
            command,
        } => {
            let hw = load_profile(profile.as_deref())?;
            let width = width.unwrap_or(config.bar_width);
            let percentage = vram_percentage.unwrap_or(config.default_vram_percentage);
            let engine = PlacementEngine::new(EngineConfig {
                bar_width: width,
                ..config
            })
            .with_storage_tier(storage);

            let plan = engine
                .plan(&model, strategy.with_percentage(percentage), None, &hw)
                .with_context(|| format!("Failed to plan placement for {}", model.display()))?;
            let launch = engine.launch_parameters(&plan, &hw);

            if json {
                let value = serde_json::json!({ "plan": plan, "launch": launch });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }

            print_model(&model, &plan);
            print_budget(&plan.budget, &plan.bar);
            print_layers(&plan);

            println!("=== Launch Parameters ===");
            println!("{}", launch.to_args().join(" "));
            for note in launch.notes() {
                println!("  • {}", note);
            }
            println!();

            if let Some(cmd) = command {
                println!("=== Launch Command ===");
                println!("{}", apply_gpu_layers(&cmd, plan.gpu_layers));
                println!();
            }

            print_recommendation(&plan.recommendation);
        }

        Commands::Fit {
            sizes,
            profile,
            width,
            storage,
        } => {
            let hw = load_profile(profile.as_deref())?;
            let width = width.unwrap_or(config.bar_width);
            let engine = PlacementEngine::new(config);

            println!("=== Model Fit ===");
            for size in sizes {
                let budget = engine.allocator().allocate_demand(size, &hw);
                let bar = engine.visualizer().render_budget(&budget, width, storage);
                let status = if budget.feasible() {
                    "fits".green()
                } else {
                    "spills to storage".red()
                };
                println!(
                    "{:>7.1} GB  {}  VRAM {:.1} / RAM {:.1} / Storage {:.1} GB  {}",
                    size,
                    paint_bar(&bar),
                    budget.vram_gb,
                    budget.ram_gb,
                    budget.storage_gb,
                    status
                );
            }
            println!();
        }
    }

    Ok(())
}

/// Read a saved profile, or probe the host when no path is given
fn load_profile(path: Option<&Path>) -> anyhow::Result<HardwareProfile> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read profile {}", path.display()))?;
            let hw: HardwareProfile = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid profile JSON in {}", path.display()))?;
            debug!(path = %path.display(), captured_at = %hw.captured_at, "Loaded saved profile");
            Ok(hw)
        }
        None => HardwareProfile::detect(None).context("Failed to profile hardware"),
    }
}

fn print_hardware(hw: &HardwareProfile) {
    println!("=== System Information ===");
    println!("Platform: {}", hw.platform);
    println!("Captured: {}", hw.captured_at.to_rfc3339());
    println!();

    println!("=== CPU ===");
    println!("Model: {}", hw.cpu_model);
    println!("Cores: {}", hw.cpu_cores);
    println!("Threads: {}", hw.cpu_threads);
    println!();

    println!("=== Memory ===");
    println!("Total: {:.1} GB", hw.system_ram_gb);
    println!("Available: {:.1} GB", hw.available_ram_gb);
    println!();

    println!("=== GPU ===");
    if hw.gpu_count == 0 {
        println!("No GPU detected (CPU-only mode)");
    } else {
        for (i, name) in hw.gpu_models.iter().enumerate() {
            println!("GPU {}: {}", i, name);
        }
        println!("VRAM Total: {:.1} GB", hw.total_vram_gb);
        println!("VRAM Free: {:.1} GB", hw.available_vram_gb);
    }
    println!();

    println!("=== Storage ===");
    println!("Available: {:.1} GB ({})", hw.available_storage_gb, hw.storage_kind);
    println!();
}

fn print_recommendation(rec: &Recommendation) {
    println!("=== Recommendation ===");
    let offload = if rec.gpu_offload_viable {
        "viable".green()
    } else {
        "not viable (CPU-only)".yellow()
    };
    println!("GPU offload: {}", offload);
    println!("Max model size: {:.1} GB", rec.max_model_size_gb);
    println!(
        "Quantization: {} ({})",
        rec.optimal_quantization.to_string().bold(),
        rec.optimal_quantization.description()
    );
    println!();
}

fn print_model(path: &Path, plan: &PlacementPlan) {
    let m = &plan.metadata;
    println!("=== Model ===");
    println!("File: {}", path.display());
    println!("Size: {:.2} GB", m.file_size_gb);
    if let Some(ref arch) = m.architecture {
        println!("Architecture: {}", arch);
    }
    if !m.magic_present {
        println!("{}", "GGUF magic not found, estimate uses file size only".yellow());
    }
    println!(
        "Estimated: {} layers, ~{:.1}B params, embedding {}",
        m.estimated_layers,
        m.estimated_params as f64 / 1e9,
        m.embedding_dim
    );
    println!(
        "Memory: {} MB model + {} MB context + {} MB overhead = {} MB",
        m.model_memory_mb,
        m.context_memory_mb,
        m.overhead_memory_mb,
        m.total_memory_mb()
    );
    if let Some(ref d) = m.divergence {
        let fmt_opt = |v: Option<u64>| v.map_or_else(|| "?".to_string(), |n| n.to_string());
        println!(
            "{}",
            format!(
                "Header declares {} layers / embedding {}, size estimate assumes {} / {}",
                fmt_opt(d.header_layers),
                fmt_opt(d.header_embedding_dim),
                d.band_layers,
                d.band_embedding_dim
            )
            .yellow()
        );
    }
    println!();
}

fn print_budget(budget: &MemoryBudget, bar: &UsageBar) {
    println!("=== Memory Budget ===");
    for tier in budget.tiers() {
        let capacity = match tier.tier {
            Tier::Storage => String::new(),
            _ => format!(" of {:.1} GB usable", tier.capacity_gb),
        };
        println!(
            "{:<8} {:>6.1} GB{}  [{}]",
            tier.tier.to_string(),
            tier.assigned_gb,
            capacity,
            paint_severity(tier.severity)
        );
    }
    println!("[{}]", paint_bar(bar));
    println!();
}

fn print_layers(plan: &PlacementPlan) {
    println!("=== GPU Layers ===");
    println!("Strategy: {}", plan.strategy);
    if plan.gpu_layers == ALL_LAYERS {
        println!("Layers on GPU: all ({})", ALL_LAYERS);
    } else {
        println!("Layers on GPU: {}/{}", plan.gpu_layers, plan.metadata.estimated_layers);
    }
    println!();
}

fn paint_severity(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Ok => severity.to_string().green(),
        Severity::Warn => severity.to_string().yellow(),
        Severity::Critical => severity.to_string().red(),
    }
}

/// Used cells take the tier's severity colour; free cells keep a per-tier tint.
fn paint_bar(bar: &UsageBar) -> String {
    if !colored::control::SHOULD_COLORIZE.should_colorize() {
        return bar.plain_text();
    }
    bar.cells
        .iter()
        .map(|cell| match cell {
            Cell::Used { severity: Severity::Ok, .. } => " ".on_green().to_string(),
            Cell::Used { severity: Severity::Warn, .. } => " ".on_yellow().to_string(),
            Cell::Used { severity: Severity::Critical, .. } => " ".on_red().to_string(),
            Cell::Free { tier: Tier::Vram } => "░".green().to_string(),
            Cell::Free { tier: Tier::Ram } => "░".yellow().to_string(),
            Cell::Free { tier: Tier::Storage } => "░".red().to_string(),
            Cell::Filler => "·".dimmed().to_string(),
            Cell::Message { ch } => ch.to_string().red().to_string(),
        })
        .collect()
}
